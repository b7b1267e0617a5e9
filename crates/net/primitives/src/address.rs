//! Network endpoint addresses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Errors returned when parsing an [`Address`] from `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address is missing a port: {0}")]
    MissingPort(String),
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
    #[error("address has an empty host")]
    EmptyHost,
}

/// A network endpoint identified by host name and port.
///
/// Equality and hashing are by value, so addresses serve directly as keys in
/// the peer tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hash used to arbitrate simultaneous authentication attempts.
    ///
    /// FNV-1a over the host bytes followed by the big-endian port. Unlike
    /// `std::hash`, the value is identical on every node and every platform,
    /// which both sides of a collision rely on.
    pub fn arbitration_hash(&self) -> u64 {
        self.host
            .as_bytes()
            .iter()
            .chain(self.port.to_be_bytes().iter())
            .fold(FNV_OFFSET_BASIS, |hash, byte| {
                (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
            })
    }

    /// Whether this address wins arbitration against `other`.
    ///
    /// The smaller arbitration hash wins; equal hashes fall back to the
    /// lexicographic order of the address so the relation stays total.
    pub fn precedes(&self, other: &Address) -> bool {
        (self.arbitration_hash(), self) < (other.arbitration_hash(), other)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressParseError::EmptyHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}
