//! Peer group events and non-blocking broadcast emitter.

use bitsquare_net_primitives::{Address, ConnectionId};
use tokio::sync::broadcast;

/// Events published by a [`PeerGroup`](crate::PeerGroup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerGroupEvent {
    /// A handshake completed and the peer joined the authenticated table.
    PeerAuthenticated {
        address: Address,
        connection: ConnectionId,
    },
    /// The peer left the authenticated table.
    PeerRemoved { address: Address },
    /// The reported-peer pool changed size.
    ReportedPeersChanged { count: usize },
    /// A connection sent an oversized peer report and was closed.
    HostileBatch {
        connection: ConnectionId,
        peer: Option<Address>,
        size: usize,
    },
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter. Slow subscribers drop events independently.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PeerGroupEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: PeerGroupEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerGroupEvent> {
        self.tx.subscribe()
    }

    pub fn peer_authenticated(&self, address: Address, connection: ConnectionId) {
        self.emit(PeerGroupEvent::PeerAuthenticated {
            address,
            connection,
        });
    }

    pub fn peer_removed(&self, address: Address) {
        self.emit(PeerGroupEvent::PeerRemoved { address });
    }

    pub fn reported_peers_changed(&self, count: usize) {
        self.emit(PeerGroupEvent::ReportedPeersChanged { count });
    }

    pub fn hostile_batch(&self, connection: ConnectionId, peer: Option<Address>, size: usize) {
        self.emit(PeerGroupEvent::HostileBatch {
            connection,
            peer,
            size,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emitter_multiple_subscribers() {
        let emitter = EventEmitter::default();
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.peer_authenticated(Address::new("peer", 1), ConnectionId(4));

        let expected = PeerGroupEvent::PeerAuthenticated {
            address: Address::new("peer", 1),
            connection: ConnectionId(4),
        };
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }

    #[test]
    fn test_event_emitter_no_subscribers() {
        let emitter = EventEmitter::default();
        assert_eq!(emitter.tx.receiver_count(), 0);

        // Should not panic even with no subscribers
        emitter.peer_removed(Address::new("peer", 1));
        emitter.reported_peers_changed(3);
    }
}
