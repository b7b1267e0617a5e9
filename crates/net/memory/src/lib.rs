//! In-memory [`NetworkNode`](bitsquare_net_transport::NetworkNode) implementation.
//!
//! A [`MemoryNetwork`] is a hub that any number of [`MemoryNode`]s register
//! with. Sends are delivered synchronously into the recipient's event channels,
//! after a trip through the wire codec, so the overlay sees exactly what it
//! would see from a real transport. Nodes can be taken offline to simulate
//! unreachable peers. Each node keeps a bounded log of what it sent, for
//! assertions.

mod connection;
mod network;

pub use connection::MemoryConnection;
pub use network::{DEFAULT_SENT_LOG_LIMIT, MemoryNetwork, MemoryNode, SentMessage};
