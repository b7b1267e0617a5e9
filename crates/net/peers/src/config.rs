//! Peer group configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default number of connections before eviction starts.
pub const DEFAULT_MAX_CONNECTIONS_LOW_PRIORITY: usize = 18;

/// Extra connections allowed per priority tier above the low threshold.
pub const CONNECTION_TIER_STEP: usize = 4;

/// Default cap of the reported-peer pool.
pub const DEFAULT_MAX_REPORTED_PEERS: usize = 1000;

/// A uniformly random delay between two inclusive bounds.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max: Duration,
}

impl DelayRange {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self::new(Duration::from_millis(min), Duration::from_millis(max))
    }

    pub const fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    /// Draw a delay. A range with `max <= min` always yields `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

/// Connection-count thresholds, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
}

impl ConnectionLimits {
    pub fn from_low(low: usize) -> Self {
        let normal = low + CONNECTION_TIER_STEP;
        Self {
            low,
            normal,
            high: normal + CONNECTION_TIER_STEP,
        }
    }
}

/// Configuration of a [`PeerGroup`](crate::PeerGroup).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerGroupConfig {
    /// Authenticated peers tolerated before eviction; the bootstrap loop stops here.
    pub max_connections_low_priority: usize,
    pub max_reported_peers: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub handshake_timeout: Duration,
    /// Period between peer exchange rounds.
    pub exchange_interval: DelayRange,
    /// Per-peer delay inside an exchange round.
    pub exchange_stagger: DelayRange,
    /// Per-peer delay before a broadcast send.
    pub broadcast_delay: DelayRange,
    /// Retry delay when every reported peer is already mid-handshake.
    pub no_candidate_backoff: DelayRange,
    /// Retry delay when neither seed nodes nor reported peers are left.
    pub exhausted_backoff: DelayRange,
    /// Delay before re-checking the connection count after an eviction.
    pub eviction_recheck_delay: DelayRange,
    pub maintenance_interval: DelayRange,
    pub ping_stagger: DelayRange,
    /// Idle time after which a peer is pinged by the maintenance round.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub inactivity_before_ping: Duration,
    /// Seed for the group's random number generator. `None` uses OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for PeerGroupConfig {
    fn default() -> Self {
        Self {
            max_connections_low_priority: DEFAULT_MAX_CONNECTIONS_LOW_PRIORITY,
            max_reported_peers: DEFAULT_MAX_REPORTED_PEERS,
            handshake_timeout: Duration::from_secs(15),
            exchange_interval: DelayRange::from_secs(120, 240),
            exchange_stagger: DelayRange::from_secs(3, 5),
            broadcast_delay: DelayRange::from_millis(10, 100),
            no_candidate_backoff: DelayRange::from_secs(10, 20),
            exhausted_backoff: DelayRange::from_secs(30, 40),
            eviction_recheck_delay: DelayRange::from_millis(10, 50),
            maintenance_interval: DelayRange::from_secs(300, 420),
            ping_stagger: DelayRange::from_secs(2, 4),
            inactivity_before_ping: Duration::from_secs(30),
            rng_seed: None,
        }
    }
}

impl PeerGroupConfig {
    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits::from_low(self.max_connections_low_priority)
    }

    /// Largest peer report accepted from a single message. Bigger batches are
    /// treated as flooding and the sender is disconnected.
    pub fn max_reported_batch(&self) -> usize {
        self.max_reported_peers + 3 * self.max_connections_low_priority
    }

    pub fn with_max_connections_low_priority(mut self, max: usize) -> Self {
        self.max_connections_low_priority = max;
        self
    }

    pub fn with_max_reported_peers(mut self, max: usize) -> Self {
        self.max_reported_peers = max;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_exchange_interval(mut self, interval: DelayRange) -> Self {
        self.exchange_interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: DelayRange) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_inactivity_before_ping(mut self, inactivity: Duration) -> Self {
        self.inactivity_before_ping = inactivity;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn test_default_limits() {
        let config = PeerGroupConfig::default();
        assert_eq!(
            config.connection_limits(),
            ConnectionLimits {
                low: 18,
                normal: 22,
                high: 26
            }
        );
        assert_eq!(config.max_reported_batch(), 1054);
        assert_eq!(
            config.with_max_reported_peers(3000).max_reported_batch(),
            3054
        );
    }

    #[test]
    fn test_delay_range_sample() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = DelayRange::from_secs(3, 5);
        for _ in 0..100 {
            let d = range.sample(&mut rng);
            assert!(d >= Duration::from_secs(3) && d <= Duration::from_secs(5));
        }
        assert_eq!(
            DelayRange::from_secs(4, 1).sample(&mut rng),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_partial_toml() {
        let config: PeerGroupConfig = toml::from_str(
            r#"
            max_connections_low_priority = 4
            handshake_timeout = 2500

            [exchange_interval]
            min = 1000
            max = 2000
            "#,
        )
        .unwrap();
        assert_eq!(config.max_connections_low_priority, 4);
        assert_eq!(config.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.exchange_interval, DelayRange::from_secs(1, 2));
        assert_eq!(config.max_reported_peers, DEFAULT_MAX_REPORTED_PEERS);
    }
}
