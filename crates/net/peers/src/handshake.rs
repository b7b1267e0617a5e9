//! Mutual authentication with a single peer.
//!
//! The exchange is two messages long. The initiator sends an
//! [`AuthenticationRequest`] carrying a fresh nonce and its peer snapshot. The
//! responder answers on the same connection with an [`AuthenticationChallenge`]
//! that echoes the nonce and carries its own snapshot. The responder considers
//! the peer authenticated once the challenge is delivered; the initiator does
//! once the echoed nonce checks out.
//!
//! A handshake only holds state. Sending, timers and peer-table updates are
//! done by the owning [`PeerGroup`](crate::PeerGroup).

use std::{collections::HashSet, fmt, mem};

use bitsquare_net_messages::{AuthenticationChallenge, AuthenticationRequest};
use bitsquare_net_primitives::{Address, ConnectionId, ReportedPeer};
use tokio::sync::oneshot;

use crate::{AuthenticationError, AuthenticationResult};

/// Distinguishes successive handshakes with the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandshakeId(pub u64);

impl fmt::Display for HandshakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hs-{}", self.0)
    }
}

/// Why an outbound handshake was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationPurpose {
    /// The designated first seed node of a bootstrap.
    FirstSeedNode,
    /// One of the remaining seed nodes.
    SeedNode,
    /// A peer taken from the reported pool.
    ReportedPeer,
    /// A caller needing a channel for a direct message.
    DirectMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeRole {
    Initiator(AuthenticationPurpose),
    Responder,
}

/// Receives the connection id of the authenticated connection, or the failure.
pub type HandshakeWaiter = oneshot::Sender<AuthenticationResult<ConnectionId>>;

/// In-flight authentication with one peer address.
pub struct AuthenticationHandshake<C> {
    id: HandshakeId,
    peer: Address,
    role: HandshakeRole,
    nonce: u64,
    /// The connection the request arrived on. Responder only.
    connection: Option<C>,
    waiters: Vec<HandshakeWaiter>,
}

impl<C> fmt::Debug for AuthenticationHandshake<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationHandshake")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

impl<C> AuthenticationHandshake<C> {
    /// Start an outbound handshake. Returns the request to send to `peer`.
    pub fn request_authentication(
        id: HandshakeId,
        local: Address,
        peer: Address,
        nonce: u64,
        purpose: AuthenticationPurpose,
        snapshot: HashSet<ReportedPeer>,
    ) -> (Self, AuthenticationRequest) {
        let request = AuthenticationRequest {
            sender_address: local,
            requester_nonce: nonce,
            reported_peers: snapshot,
        };
        let handshake = Self {
            id,
            peer,
            role: HandshakeRole::Initiator(purpose),
            nonce,
            connection: None,
            waiters: Vec::new(),
        };
        (handshake, request)
    }

    /// Accept an inbound request. Returns the challenge to send back over
    /// `connection`.
    pub fn respond_to_authentication_request(
        id: HandshakeId,
        local: Address,
        request: &AuthenticationRequest,
        nonce: u64,
        connection: C,
        snapshot: HashSet<ReportedPeer>,
    ) -> (Self, AuthenticationChallenge) {
        let challenge = AuthenticationChallenge {
            sender_address: local,
            requester_nonce: request.requester_nonce,
            responder_nonce: nonce,
            reported_peers: snapshot,
        };
        let handshake = Self {
            id,
            peer: request.sender_address.clone(),
            role: HandshakeRole::Responder,
            nonce,
            connection: Some(connection),
            waiters: Vec::new(),
        };
        (handshake, challenge)
    }

    pub fn id(&self) -> HandshakeId {
        self.id
    }

    pub fn peer(&self) -> &Address {
        &self.peer
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self.role, HandshakeRole::Initiator(_))
    }

    pub fn purpose(&self) -> Option<AuthenticationPurpose> {
        match self.role {
            HandshakeRole::Initiator(purpose) => Some(purpose),
            HandshakeRole::Responder => None,
        }
    }

    /// The connection the peer's request arrived on, for a responder.
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    /// Check a challenge against the request this initiator sent.
    pub fn verify_challenge(&self, challenge: &AuthenticationChallenge) -> AuthenticationResult<()> {
        if challenge.sender_address != self.peer {
            return Err(AuthenticationError::UnexpectedSender {
                expected: self.peer.clone(),
                received: challenge.sender_address.clone(),
            });
        }
        if challenge.requester_nonce != self.nonce {
            return Err(AuthenticationError::NonceMismatch {
                expected: self.nonce,
                received: challenge.requester_nonce,
            });
        }
        Ok(())
    }

    /// Register interest in the outcome.
    #[cfg(test)]
    pub(crate) fn subscribe(
        &mut self,
    ) -> oneshot::Receiver<AuthenticationResult<ConnectionId>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    pub fn add_waiter(&mut self, waiter: HandshakeWaiter) {
        self.waiters.push(waiter);
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    pub fn take_waiters(&mut self) -> Vec<HandshakeWaiter> {
        mem::take(&mut self.waiters)
    }

    pub fn extend_waiters(&mut self, waiters: impl IntoIterator<Item = HandshakeWaiter>) {
        self.waiters.extend(waiters);
    }

    /// Resolve every waiter and consume the handshake.
    pub fn complete(self, result: AuthenticationResult<ConnectionId>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }

    pub fn cancel(self) {
        self.complete(Err(AuthenticationError::Cancelled));
    }
}

/// What to do when a peer's request meets our own outbound handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionResolution {
    /// Keep our request alive and reject theirs.
    KeepOwn,
    /// Cancel our request and answer theirs.
    AcceptRemote,
}

/// Decide a simultaneous authentication between `local` and `remote`.
///
/// Both nodes evaluate this with the roles swapped and always reach opposite
/// answers, so exactly one handshake survives.
pub fn resolve_collision(local: &Address, remote: &Address) -> CollisionResolution {
    if local.precedes(remote) {
        CollisionResolution::KeepOwn
    } else {
        CollisionResolution::AcceptRemote
    }
}
