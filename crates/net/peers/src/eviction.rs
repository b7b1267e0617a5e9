//! Choosing which connection to drop when the peer count exceeds its limits.

use std::time::Instant;

use bitsquare_net_primitives::{ConnectionId, ConnectionPriority};
use bitsquare_net_transport::Connection;

use crate::ConnectionLimits;

/// The connection attributes eviction looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub authenticated: bool,
    pub priority: ConnectionPriority,
    pub last_activity: Instant,
}

impl ConnectionSnapshot {
    pub fn of<C: Connection>(connection: &C) -> Self {
        Self {
            id: connection.id(),
            authenticated: connection.is_authenticated(),
            priority: connection.priority(),
            last_activity: connection.last_activity(),
        }
    }
}

/// Pick the connection to evict, if any, given `authenticated` peers.
///
/// Nothing is evicted at or below the low threshold. Passive connections go
/// first; above the normal threshold active ones become eligible too.
/// `AuthRequest` connections are never eligible, so past the high threshold
/// the candidate set stays the same. The least recently active eligible
/// connection is chosen.
pub fn select_eviction_candidate(
    authenticated: usize,
    connections: &[ConnectionSnapshot],
    limits: &ConnectionLimits,
) -> Option<ConnectionId> {
    if authenticated <= limits.low {
        return None;
    }

    let oldest = |max_priority: ConnectionPriority| {
        connections
            .iter()
            .filter(|c| c.authenticated && c.priority <= max_priority)
            .min_by_key(|c| c.last_activity)
            .map(|c| c.id)
    };

    oldest(ConnectionPriority::Passive).or_else(|| {
        (authenticated > limits.normal)
            .then(|| oldest(ConnectionPriority::Active))
            .flatten()
    })
}
