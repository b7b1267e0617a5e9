use std::time::Duration;

use bitsquare_net_primitives::Address;
use bitsquare_net_transport::TransportError;

/// Why an authentication attempt did not produce an authenticated peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("peer rejected the authentication request")]
    Rejected,
    #[error("authentication was cancelled")]
    Cancelled,
    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),
    #[error("challenge echoed nonce {received}, expected {expected}")]
    NonceMismatch { expected: u64, received: u64 },
    #[error("challenge came from {received}, expected {expected}")]
    UnexpectedSender { expected: Address, received: Address },
    #[error("peer reported {0} peers, exceeding the batch limit")]
    TooManyReportedPeers(usize),
    #[error("peer was removed during authentication")]
    PeerRemoved,
    #[error("cannot authenticate to own address")]
    OwnAddress,
    #[error("peer group service stopped")]
    ServiceStopped,
}

pub type AuthenticationResult<T> = Result<T, AuthenticationError>;

/// Errors from talking to a running peer group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerGroupError {
    #[error("peer group service stopped")]
    ServiceStopped,
}

pub type PeerGroupResult<T> = Result<T, PeerGroupError>;
