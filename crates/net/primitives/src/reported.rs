//! Gossip records for peers learned from other nodes.

use std::{
    fmt,
    hash::{Hash, Hasher},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::Address;

/// Milliseconds since the unix epoch, saturating to zero for clocks set before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// An address reported by another node, with the time it was last seen active.
///
/// Identity is the address alone: two records for the same address are equal
/// whatever their timestamps, so a set holds at most one record per address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedPeer {
    pub address: Address,
    /// Last activity in unix milliseconds.
    pub last_activity: u64,
}

impl ReportedPeer {
    pub fn new(address: Address, last_activity: u64) -> Self {
        Self {
            address,
            last_activity,
        }
    }
}

impl PartialEq for ReportedPeer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ReportedPeer {}

impl Hash for ReportedPeer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for ReportedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.last_activity)
    }
}
