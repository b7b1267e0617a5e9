//! Overlay network wire messages.
//!
//! All messages belong to one [`NetworkMessage`] family and travel inside an
//! [`Envelope`] stamped with [`PROTOCOL_VERSION`]. Nodes refuse envelopes of
//! another version rather than guessing at their layout.

mod codec;
mod error;
mod message;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, Envelope, NetworkMessageCodec, PROTOCOL_VERSION, decode, encode};
pub use error::{CodecError, CodecResult};
pub use message::{
    AuthenticationChallenge, AuthenticationMessage, AuthenticationRejection,
    AuthenticationRequest, DataBroadcast, GetPeersRequest, GetPeersResponse, MaintenanceMessage,
    NetworkMessage, PeerExchangeMessage, Ping, Pong,
};
