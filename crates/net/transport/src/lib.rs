//! Transport contract for the overlay network.
//!
//! The overlay never opens sockets itself. It drives a [`NetworkNode`] that
//! sends messages, hands out [`Connection`] handles and reports everything that
//! happens on the wire as [`NetworkEvent`]s on a channel.

use std::{fmt::Debug, time::Instant};

use bitsquare_net_messages::{CodecError, NetworkMessage};
use bitsquare_net_primitives::{Address, ConnectionId, ConnectionPriority};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Transport failures. Cloned to every party waiting on the same operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(Address),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("local node is offline")]
    Offline,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Resolves to the connection the message went out on.
pub type SendFuture<C> = BoxFuture<'static, TransportResult<C>>;

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisconnectReason {
    /// Closed locally through [`Connection::shut_down`].
    Shutdown,
    /// The remote side closed the connection.
    RemoteClosed,
    /// The remote node went offline.
    PeerOffline,
    Timeout,
}

/// Everything a node observes on the wire.
#[derive(Debug, Clone)]
pub enum NetworkEvent<C> {
    Connected(C),
    Disconnected {
        connection: C,
        reason: DisconnectReason,
        peer_address: Option<Address>,
    },
    Message {
        message: NetworkMessage,
        connection: C,
    },
    Error {
        connection: C,
        error: TransportError,
    },
}

/// A live connection handle.
///
/// Handles are cheap clones of shared state; setters take `&self`.
pub trait Connection: Clone + Debug + Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    /// Address of the remote node, known once it has introduced itself.
    fn peer_address(&self) -> Option<Address>;

    fn set_peer_address(&self, address: Address);

    fn is_authenticated(&self) -> bool;

    fn set_authenticated(&self);

    fn priority(&self) -> ConnectionPriority;

    fn set_priority(&self, priority: ConnectionPriority);

    /// Time of the last message sent or received.
    fn last_activity(&self) -> Instant;

    /// Close the connection. Resolves once both sides have been notified.
    fn shut_down(&self) -> BoxFuture<'static, ()>;
}

/// A node on the network.
#[auto_impl::auto_impl(Arc)]
pub trait NetworkNode: Send + Sync + 'static {
    type Connection: Connection;

    /// This node's own listening address.
    fn local_address(&self) -> Address;

    /// Send over an existing connection to `address`, opening one if needed.
    fn send_to_address(
        &self,
        address: &Address,
        message: NetworkMessage,
    ) -> SendFuture<Self::Connection>;

    fn send_to_connection(
        &self,
        connection: &Self::Connection,
        message: NetworkMessage,
    ) -> SendFuture<Self::Connection>;

    /// Register a listener. Dropping the receiver unregisters it.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<NetworkEvent<Self::Connection>>;

    fn all_connections(&self) -> Vec<Self::Connection>;
}
