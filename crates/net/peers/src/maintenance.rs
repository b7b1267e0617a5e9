//! Liveness checks on idle authenticated connections.

use std::{collections::HashMap, time::{Duration, Instant}};

use bitsquare_net_messages::{Ping, Pong};
use bitsquare_net_primitives::Address;
use rand::Rng;
use tracing::{debug, warn};

use crate::{DelayRange, PeerView};

/// A ping to send after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingAction {
    pub to: Address,
    pub delay: Duration,
}

/// How a received pong relates to the ping we sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongCheck {
    Matched,
    Mismatch { expected: u64, received: u64 },
    Unsolicited,
}

/// Pings peers that have been quiet for too long.
#[derive(Debug)]
pub struct MaintenanceManager {
    interval: DelayRange,
    stagger: DelayRange,
    inactivity: Duration,
    pending: HashMap<Address, u64>,
}

impl MaintenanceManager {
    pub fn new(interval: DelayRange, stagger: DelayRange, inactivity: Duration) -> Self {
        Self {
            interval,
            stagger,
            inactivity,
            pending: HashMap::new(),
        }
    }

    pub fn next_round_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.interval.sample(rng)
    }

    /// A ping for every authenticated peer idle for at least the inactivity period.
    pub fn plan_round<R: Rng + ?Sized>(
        &self,
        view: &impl PeerView,
        now: Instant,
        rng: &mut R,
    ) -> Vec<PingAction> {
        let actions: Vec<_> = view
            .authenticated_addresses()
            .into_iter()
            .filter(|peer| {
                view.last_activity(peer)
                    .is_some_and(|last| now.saturating_duration_since(last) >= self.inactivity)
            })
            .map(|to| PingAction {
                to,
                delay: self.stagger.sample(rng),
            })
            .collect();
        debug!(idle = actions.len(), "planned maintenance round");
        actions
    }

    /// Build a ping for `peer`, remembering its nonce.
    pub fn build_ping<R: Rng + ?Sized>(&mut self, peer: &Address, rng: &mut R) -> Ping {
        let nonce = rng.random();
        self.pending.insert(peer.clone(), nonce);
        Ping { nonce }
    }

    pub fn on_ping(&self, ping: Ping) -> Pong {
        Pong { nonce: ping.nonce }
    }

    pub fn on_pong(&mut self, peer: &Address, pong: Pong) -> PongCheck {
        match self.pending.remove(peer) {
            Some(expected) if expected == pong.nonce => PongCheck::Matched,
            Some(expected) => {
                warn!(%peer, expected, received = pong.nonce, "pong nonce mismatch");
                PongCheck::Mismatch {
                    expected,
                    received: pong.nonce,
                }
            }
            None => PongCheck::Unsolicited,
        }
    }

    /// Drop bookkeeping for a removed peer.
    pub fn forget(&mut self, peer: &Address) {
        self.pending.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::view::test_view::StaticView;

    fn manager() -> MaintenanceManager {
        MaintenanceManager::new(
            DelayRange::from_secs(300, 420),
            DelayRange::from_secs(2, 4),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_only_idle_peers_are_pinged() {
        let base = Instant::now();
        let now = base + Duration::from_secs(100);
        let view = StaticView {
            authenticated: [
                (Address::new("idle", 1), base),
                (Address::new("busy", 1), now - Duration::from_secs(5)),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);

        let actions = manager().plan_round(&view, now, &mut rng);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].to, Address::new("idle", 1));
    }

    #[test]
    fn test_pong_matching() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut manager = manager();
        let peer = Address::new("peer", 1);

        let ping = manager.build_ping(&peer, &mut rng);
        let pong = manager.on_ping(ping);
        assert_eq!(manager.on_pong(&peer, pong), PongCheck::Matched);
        assert_eq!(manager.on_pong(&peer, pong), PongCheck::Unsolicited);

        let ping = manager.build_ping(&peer, &mut rng);
        assert_eq!(
            manager.on_pong(&peer, Pong { nonce: ping.nonce.wrapping_add(1) }),
            PongCheck::Mismatch {
                expected: ping.nonce,
                received: ping.nonce.wrapping_add(1)
            }
        );
    }
}
