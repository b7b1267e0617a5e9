//! Cloneable handle for talking to a running peer group.

use std::collections::HashSet;

use bitsquare_net_messages::DataBroadcast;
use bitsquare_net_primitives::{Address, ConnectionId, ReportedPeer};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    AuthenticationError, AuthenticationResult, EventEmitter, HandshakeWaiter, PeerGroupError,
    PeerGroupEvent, PeerGroupResult, PeerGroupStatus,
};

/// Commands from handles to the service.
#[derive(Debug)]
pub(crate) enum Command {
    AuthenticateToSeedNode {
        first: Address,
        seed_nodes: HashSet<Address>,
    },
    AuthenticateToDirectMessagePeer {
        peer: Address,
        response: HandshakeWaiter,
    },
    Broadcast {
        message: DataBroadcast,
        sender: Option<Address>,
    },
    AuthenticatedPeers {
        response: oneshot::Sender<Vec<Address>>,
    },
    ReportedPeers {
        response: oneshot::Sender<Vec<ReportedPeer>>,
    },
    AuthenticatedAndReportedPeers {
        response: oneshot::Sender<HashSet<ReportedPeer>>,
    },
    IsInAuthenticationProcess {
        peer: Address,
        response: oneshot::Sender<bool>,
    },
    Status {
        response: oneshot::Sender<PeerGroupStatus>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Handle to a [`PeerGroup`](crate::PeerGroup) service.
///
/// The group stops once every handle is dropped or [`shutdown`](Self::shutdown)
/// is called.
#[derive(Debug, Clone)]
pub struct PeerGroupHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    events: EventEmitter,
}

impl PeerGroupHandle {
    pub(crate) fn new(command_tx: mpsc::UnboundedSender<Command>, events: EventEmitter) -> Self {
        Self { command_tx, events }
    }

    /// Start bootstrapping from `first`, then the remaining `seed_nodes`, then
    /// reported peers.
    pub fn authenticate_to_seed_node(
        &self,
        first: Address,
        seed_nodes: HashSet<Address>,
    ) -> PeerGroupResult<()> {
        self.send(Command::AuthenticateToSeedNode { first, seed_nodes })
    }

    /// Authenticate to `peer` for a direct message, outside the bootstrap loop.
    ///
    /// Resolves immediately when already authenticated and joins a handshake
    /// that is already in flight. A command the service drops on its way down
    /// resolves to [`AuthenticationError::ServiceStopped`].
    pub async fn authenticate_to_direct_message_peer(
        &self,
        peer: Address,
    ) -> AuthenticationResult<ConnectionId> {
        let (response, rx) = oneshot::channel();
        self.command_tx
            .send(Command::AuthenticateToDirectMessagePeer { peer, response })
            .map_err(|_| AuthenticationError::ServiceStopped)?;
        rx.await.unwrap_or(Err(AuthenticationError::ServiceStopped))
    }

    /// Send `message` to every authenticated peer except `sender`.
    pub fn broadcast(&self, message: DataBroadcast, sender: Option<Address>) -> PeerGroupResult<()> {
        self.send(Command::Broadcast { message, sender })
    }

    pub async fn authenticated_peers(&self) -> PeerGroupResult<Vec<Address>> {
        self.request(|response| Command::AuthenticatedPeers { response })
            .await
    }

    pub async fn reported_peers(&self) -> PeerGroupResult<Vec<ReportedPeer>> {
        self.request(|response| Command::ReportedPeers { response })
            .await
    }

    /// The snapshot this node shares with peers.
    pub async fn authenticated_and_reported_peers(&self) -> PeerGroupResult<HashSet<ReportedPeer>> {
        self.request(|response| Command::AuthenticatedAndReportedPeers { response })
            .await
    }

    pub async fn is_in_authentication_process(&self, peer: Address) -> PeerGroupResult<bool> {
        self.request(|response| Command::IsInAuthenticationProcess { peer, response })
            .await
    }

    pub async fn status(&self) -> PeerGroupResult<PeerGroupStatus> {
        self.request(|response| Command::Status { response }).await
    }

    /// Cancel timers and handshakes, close authenticated connections and stop
    /// the service.
    pub async fn shutdown(&self) -> PeerGroupResult<()> {
        self.request(|response| Command::Shutdown { response })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerGroupEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) -> PeerGroupResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| PeerGroupError::ServiceStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> PeerGroupResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| PeerGroupError::ServiceStopped)
    }
}
