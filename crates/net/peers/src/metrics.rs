//! Peer group metrics.

use metrics::{Counter, Gauge};

/// Peer group metrics
#[derive(Clone, Debug)]
pub(crate) struct PeerGroupMetrics {
    /// Outbound handshakes started
    pub(crate) handshakes_started: Counter,
    /// Handshakes (either role) that authenticated a peer
    pub(crate) handshakes_succeeded: Counter,
    /// Handshakes that failed, timed out or were removed
    pub(crate) handshakes_failed: Counter,
    /// Inbound requests that met our own outbound handshake
    pub(crate) collisions: Counter,
    pub(crate) rejections_sent: Counter,
    pub(crate) evictions: Counter,
    /// Oversized peer reports that closed their connection
    pub(crate) hostile_batches: Counter,
    pub(crate) broadcast_sends: Counter,
    pub(crate) exchange_requests: Counter,
    pub(crate) authenticated_peers: Gauge,
    pub(crate) reported_peers: Gauge,
}

impl Default for PeerGroupMetrics {
    fn default() -> Self {
        Self {
            handshakes_started: metrics::counter!("peer_group.handshakes_started_total"),
            handshakes_succeeded: metrics::counter!("peer_group.handshakes_succeeded_total"),
            handshakes_failed: metrics::counter!("peer_group.handshakes_failed_total"),
            collisions: metrics::counter!("peer_group.collisions_total"),
            rejections_sent: metrics::counter!("peer_group.rejections_sent_total"),
            evictions: metrics::counter!("peer_group.evictions_total"),
            hostile_batches: metrics::counter!("peer_group.hostile_batches_total"),
            broadcast_sends: metrics::counter!("peer_group.broadcast_sends_total"),
            exchange_requests: metrics::counter!("peer_group.exchange_requests_total"),
            authenticated_peers: metrics::gauge!("peer_group.authenticated_peers"),
            reported_peers: metrics::gauge!("peer_group.reported_peers"),
        }
    }
}

impl PeerGroupMetrics {
    pub(crate) fn set_table_sizes(&self, authenticated: usize, reported: usize) {
        self.authenticated_peers.set(authenticated as f64);
        self.reported_peers.set(reported as f64);
    }
}
