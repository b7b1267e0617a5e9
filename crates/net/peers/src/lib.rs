//! Peer authentication, gossip and connection management for the overlay.
//!
//! A [`PeerGroup`] runs as a single actor on top of any [`NetworkNode`]
//! transport and is driven through a cloneable [`PeerGroupHandle`].
//!
//! [`NetworkNode`]: bitsquare_net_transport::NetworkNode

pub mod config;
pub mod error;
pub mod events;
pub mod eviction;
pub mod exchange;
pub mod group;
pub mod handle;
pub mod handshake;
pub mod maintenance;
mod metrics;
pub mod reported;
mod scheduler;
pub mod view;

pub use config::{ConnectionLimits, DelayRange, PeerGroupConfig};
pub use error::{AuthenticationError, AuthenticationResult, PeerGroupError, PeerGroupResult};
pub use events::{EventEmitter, PeerGroupEvent};
pub use eviction::{ConnectionSnapshot, select_eviction_candidate};
pub use exchange::{ExchangeAction, PeerExchangeManager};
pub use group::{Peer, PeerGroup, PeerGroupStatus};
pub use handle::PeerGroupHandle;
pub use handshake::{
    AuthenticationHandshake, AuthenticationPurpose, CollisionResolution, HandshakeId,
    HandshakeWaiter, resolve_collision,
};
pub use maintenance::{MaintenanceManager, PingAction, PongCheck};
pub use reported::{MergeOutcome, ReportedPeers};
pub use view::PeerView;
