//! The network message family.

use std::collections::HashSet;

use bitsquare_net_primitives::{Address, ReportedPeer};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// First step of the handshake, sent by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRequest {
    pub sender_address: Address,
    pub requester_nonce: u64,
    /// The initiator's authenticated and reported peers.
    pub reported_peers: HashSet<ReportedPeer>,
}

/// Responder's answer to an [`AuthenticationRequest`]. Echoes the requester nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationChallenge {
    pub sender_address: Address,
    pub requester_nonce: u64,
    pub responder_nonce: u64,
    pub reported_peers: HashSet<ReportedPeer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRejection {
    pub sender_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum AuthenticationMessage {
    Request(AuthenticationRequest),
    Challenge(AuthenticationChallenge),
    Rejection(AuthenticationRejection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPeersRequest {
    pub sender_address: Address,
    pub reported_peers: HashSet<ReportedPeer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPeersResponse {
    pub reported_peers: HashSet<ReportedPeer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum PeerExchangeMessage {
    GetPeersRequest(GetPeersRequest),
    GetPeersResponse(GetPeersResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum MaintenanceMessage {
    Ping(Ping),
    Pong(Pong),
}

/// Opaque application payload flooded to every authenticated peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBroadcast {
    pub payload: Bytes,
}

impl DataBroadcast {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Every message the overlay sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMessage {
    Authentication(AuthenticationMessage),
    PeerExchange(PeerExchangeMessage),
    Maintenance(MaintenanceMessage),
    Data(DataBroadcast),
}

impl NetworkMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(msg) => msg.into(),
            Self::PeerExchange(msg) => msg.into(),
            Self::Maintenance(msg) => msg.into(),
            Self::Data(_) => "Data",
        }
    }
}

impl From<AuthenticationRequest> for NetworkMessage {
    fn from(msg: AuthenticationRequest) -> Self {
        Self::Authentication(AuthenticationMessage::Request(msg))
    }
}

impl From<AuthenticationChallenge> for NetworkMessage {
    fn from(msg: AuthenticationChallenge) -> Self {
        Self::Authentication(AuthenticationMessage::Challenge(msg))
    }
}

impl From<AuthenticationRejection> for NetworkMessage {
    fn from(msg: AuthenticationRejection) -> Self {
        Self::Authentication(AuthenticationMessage::Rejection(msg))
    }
}

impl From<GetPeersRequest> for NetworkMessage {
    fn from(msg: GetPeersRequest) -> Self {
        Self::PeerExchange(PeerExchangeMessage::GetPeersRequest(msg))
    }
}

impl From<GetPeersResponse> for NetworkMessage {
    fn from(msg: GetPeersResponse) -> Self {
        Self::PeerExchange(PeerExchangeMessage::GetPeersResponse(msg))
    }
}

impl From<Ping> for NetworkMessage {
    fn from(msg: Ping) -> Self {
        Self::Maintenance(MaintenanceMessage::Ping(msg))
    }
}

impl From<Pong> for NetworkMessage {
    fn from(msg: Pong) -> Self {
        Self::Maintenance(MaintenanceMessage::Pong(msg))
    }
}

impl From<DataBroadcast> for NetworkMessage {
    fn from(msg: DataBroadcast) -> Self {
        Self::Data(msg)
    }
}
