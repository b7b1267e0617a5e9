//! Value types for the overlay network.
//!
//! Everything in here is plain data: addresses used as map keys, gossip records
//! and the tags a transport attaches to each connection.

mod address;
mod connection;
mod reported;

pub use address::{Address, AddressParseError};
pub use connection::{ConnectionId, ConnectionPriority};
pub use reported::{ReportedPeer, unix_millis};
