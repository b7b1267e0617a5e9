//! Connection identity and eviction tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a transport connection, unique per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Eviction protection level of a connection.
///
/// Ordered so that a higher tag is harder to evict. `AuthRequest` is set on
/// connections carrying an inbound authentication request and is never evicted.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionPriority {
    #[default]
    Passive,
    Active,
    AuthRequest,
}
