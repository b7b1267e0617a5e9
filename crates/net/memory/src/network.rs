use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use asynchronous_codec::{Decoder, Encoder};
use bitsquare_net_messages::{NetworkMessage, NetworkMessageCodec};
use bitsquare_net_primitives::{Address, ConnectionId};
use bitsquare_net_transport::{
    Connection, DisconnectReason, NetworkEvent, NetworkNode, SendFuture, TransportError,
    TransportResult,
};
use bytes::BytesMut;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::MemoryConnection;

type Listener = mpsc::UnboundedSender<NetworkEvent<MemoryConnection>>;

/// Sent messages kept per node unless configured otherwise.
pub const DEFAULT_SENT_LOG_LIMIT: usize = 4096;

/// A message recorded on the sending side.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: Address,
    pub connection: ConnectionId,
    pub message: NetworkMessage,
}

#[derive(Default)]
struct NodeState {
    online: bool,
    listeners: Vec<Listener>,
    /// Local connection ends keyed by the remote node's address.
    connections: HashMap<Address, MemoryConnection>,
    /// Most recent sends, oldest first.
    sent: VecDeque<SentMessage>,
}

impl NodeState {
    fn emit(&mut self, event: NetworkEvent<MemoryConnection>) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub(crate) struct Hub {
    nodes: HashMap<Address, NodeState>,
    next_connection_id: u64,
    codec: NetworkMessageCodec,
    sent_log_limit: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            next_connection_id: 0,
            codec: NetworkMessageCodec::default(),
            sent_log_limit: DEFAULT_SENT_LOG_LIMIT,
        }
    }
}

impl Hub {
    fn is_online(&self, address: &Address) -> bool {
        self.nodes.get(address).is_some_and(|node| node.online)
    }

    fn next_id(&mut self) -> ConnectionId {
        self.next_connection_id += 1;
        ConnectionId(self.next_connection_id)
    }

    /// Existing open connection from `from` to `to`, or a freshly opened one.
    fn connect(
        &mut self,
        hub: &Arc<Mutex<Hub>>,
        from: &Address,
        to: &Address,
    ) -> TransportResult<MemoryConnection> {
        if !self.is_online(from) {
            return Err(TransportError::Offline);
        }
        if !self.is_online(to) {
            return Err(TransportError::Unreachable(to.clone()));
        }
        if let Some(existing) = self
            .nodes
            .get(from)
            .and_then(|node| node.connections.get(to))
            .filter(|conn| conn.is_open())
        {
            return Ok(existing.clone());
        }

        let weak = Arc::downgrade(hub);
        let outbound_id = self.next_id();
        let inbound_id = self.next_id();
        // The dialing side knows whom it dialed; the accepting side learns the
        // peer address only from the peer's own messages.
        let outbound = MemoryConnection::new(
            outbound_id,
            from.clone(),
            to.clone(),
            Some(to.clone()),
            weak.clone(),
        );
        let inbound = MemoryConnection::new(inbound_id, to.clone(), from.clone(), None, weak);

        if let Some(node) = self.nodes.get_mut(from) {
            node.connections.insert(to.clone(), outbound.clone());
            node.emit(NetworkEvent::Connected(outbound.clone()));
        }
        if let Some(node) = self.nodes.get_mut(to) {
            node.connections.insert(from.clone(), inbound.clone());
            node.emit(NetworkEvent::Connected(inbound));
        }
        trace!(%from, %to, id = %outbound_id, "memory connection opened");
        Ok(outbound)
    }

    /// Push `message` through the wire codec and into the remote listeners.
    fn deliver(
        &mut self,
        connection: &MemoryConnection,
        message: NetworkMessage,
    ) -> TransportResult<MemoryConnection> {
        if !connection.is_open() {
            return Err(TransportError::ConnectionClosed(connection.id()));
        }
        if !self.is_online(connection.local()) {
            return Err(TransportError::Offline);
        }

        let mut frame = BytesMut::new();
        self.codec.encode(&message, &mut frame)?;
        let decoded = self
            .codec
            .decode(&mut frame)?
            .ok_or(TransportError::ConnectionClosed(connection.id()))?;

        let remote_end = self
            .nodes
            .get(connection.remote())
            .filter(|node| node.online)
            .and_then(|node| node.connections.get(connection.local()))
            .filter(|conn| conn.is_open())
            .cloned()
            .ok_or(TransportError::ConnectionClosed(connection.id()))?;

        connection.touch();
        remote_end.touch();
        let limit = self.sent_log_limit;
        if let Some(sender) = self
            .nodes
            .get_mut(connection.local())
            .filter(|_| limit > 0)
        {
            if sender.sent.len() >= limit {
                sender.sent.pop_front();
            }
            sender.sent.push_back(SentMessage {
                to: connection.remote().clone(),
                connection: connection.id(),
                message: message.clone(),
            });
        }
        if let Some(receiver) = self.nodes.get_mut(connection.remote()) {
            receiver.emit(NetworkEvent::Message {
                message: decoded,
                connection: remote_end,
            });
        }
        trace!(from = %connection.local(), to = %connection.remote(), kind = message.kind(), "memory message delivered");
        Ok(connection.clone())
    }

    /// Close both ends of `connection`, telling each side why.
    pub(crate) fn close(&mut self, connection: &MemoryConnection, reason: DisconnectReason) {
        let local = connection.local().clone();
        let remote = connection.remote().clone();
        let remote_end = self
            .nodes
            .get(&remote)
            .and_then(|node| node.connections.get(&local))
            .filter(|conn| conn.is_open())
            .cloned();

        if connection.mark_closed() {
            if let Some(node) = self.nodes.get_mut(&local) {
                if node
                    .connections
                    .get(&remote)
                    .is_some_and(|c| c.id() == connection.id())
                {
                    node.connections.remove(&remote);
                }
                node.emit(NetworkEvent::Disconnected {
                    connection: connection.clone(),
                    reason,
                    peer_address: connection.peer_address(),
                });
            }
        }

        if let Some(remote_end) = remote_end {
            if remote_end.mark_closed() {
                let remote_reason = match reason {
                    DisconnectReason::Shutdown => DisconnectReason::RemoteClosed,
                    other => other,
                };
                if let Some(node) = self.nodes.get_mut(&remote) {
                    node.connections.remove(&local);
                    node.emit(NetworkEvent::Disconnected {
                        connection: remote_end.clone(),
                        reason: remote_reason,
                        peer_address: remote_end.peer_address(),
                    });
                }
            }
        }
    }
}

/// Shared hub connecting every [`MemoryNode`] created from it.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hub = self.hub.lock();
        f.debug_struct("MemoryNetwork")
            .field("nodes", &hub.nodes.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` sent messages per node, dropping the oldest.
    /// Zero turns recording off.
    pub fn with_sent_log_limit(self, limit: usize) -> Self {
        self.hub.lock().sent_log_limit = limit;
        self
    }

    /// Register an online node listening on `address`.
    pub fn add_node(&self, address: Address) -> MemoryNode {
        let mut hub = self.hub.lock();
        let node = hub.nodes.entry(address.clone()).or_default();
        node.online = true;
        MemoryNode {
            address,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Take a node offline or bring it back.
    ///
    /// Going offline closes all its connections; remote ends see
    /// [`DisconnectReason::PeerOffline`].
    pub fn set_online(&self, address: &Address, online: bool) {
        let mut hub = self.hub.lock();
        let connections: Vec<MemoryConnection> = match hub.nodes.get_mut(address) {
            Some(node) => {
                node.online = online;
                if online {
                    return;
                }
                node.connections.values().cloned().collect()
            }
            None => return,
        };
        for connection in connections {
            hub.close(&connection, DisconnectReason::PeerOffline);
        }
    }

    pub fn is_online(&self, address: &Address) -> bool {
        self.hub.lock().is_online(address)
    }

    /// The messages `from` has sent that are still in its log, oldest first.
    pub fn sent_messages(&self, from: &Address) -> Vec<SentMessage> {
        self.hub
            .lock()
            .nodes
            .get(from)
            .map(|node| node.sent.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_sent_messages(&self, from: &Address) {
        if let Some(node) = self.hub.lock().nodes.get_mut(from) {
            node.sent.clear();
        }
    }
}

/// A node attached to a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryNode {
    address: Address,
    hub: Arc<Mutex<Hub>>,
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNode")
            .field("address", &self.address)
            .finish()
    }
}

impl NetworkNode for MemoryNode {
    type Connection = MemoryConnection;

    fn local_address(&self) -> Address {
        self.address.clone()
    }

    fn send_to_address(
        &self,
        address: &Address,
        message: NetworkMessage,
    ) -> SendFuture<Self::Connection> {
        let mut hub = self.hub.lock();
        let result = hub
            .connect(&self.hub, &self.address, address)
            .and_then(|connection| hub.deliver(&connection, message));
        futures::future::ready(result).boxed()
    }

    fn send_to_connection(
        &self,
        connection: &Self::Connection,
        message: NetworkMessage,
    ) -> SendFuture<Self::Connection> {
        let result = self.hub.lock().deliver(connection, message);
        futures::future::ready(result).boxed()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<NetworkEvent<Self::Connection>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(node) = self.hub.lock().nodes.get_mut(&self.address) {
            node.listeners.push(tx);
        }
        rx
    }

    fn all_connections(&self) -> Vec<Self::Connection> {
        self.hub
            .lock()
            .nodes
            .get(&self.address)
            .map(|node| node.connections.values().cloned().collect())
            .unwrap_or_default()
    }
}
