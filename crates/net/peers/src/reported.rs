//! Pool of peers learned through gossip and not yet authenticated.

use std::collections::{HashMap, hash_map::Entry};

use bitsquare_net_primitives::{Address, ReportedPeer};
use rand::{Rng, seq::IndexedRandom, seq::SliceRandom};

/// Result of merging a batch into the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub updated: usize,
    pub excluded: usize,
}

/// Reported peers keyed by address.
#[derive(Debug, Clone, Default)]
pub struct ReportedPeers {
    peers: HashMap<Address, ReportedPeer>,
}

impl ReportedPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.peers.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&ReportedPeer> {
        self.peers.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReportedPeer> {
        self.peers.values()
    }

    pub fn remove(&mut self, address: &Address) -> Option<ReportedPeer> {
        self.peers.remove(address)
    }

    /// Merge reported peers, skipping every address for which `is_excluded`
    /// holds.
    ///
    /// A peer already in the pool keeps the midpoint of its stored and newly
    /// reported timestamps, so a single lying report can only move it halfway.
    pub fn merge<I>(&mut self, batch: I, is_excluded: impl Fn(&Address) -> bool) -> MergeOutcome
    where
        I: IntoIterator<Item = ReportedPeer>,
    {
        let mut outcome = MergeOutcome::default();
        for peer in batch {
            if is_excluded(&peer.address) {
                outcome.excluded += 1;
                continue;
            }
            match self.peers.entry(peer.address.clone()) {
                Entry::Occupied(mut entry) => {
                    let stored = entry.get_mut();
                    stored.last_activity = stored.last_activity.midpoint(peer.last_activity);
                    outcome.updated += 1;
                }
                Entry::Vacant(entry) => {
                    entry.insert(peer);
                    outcome.added += 1;
                }
            }
        }
        outcome
    }

    /// Randomly evict entries until at most `max` remain. Returns how many were
    /// removed.
    ///
    /// Eviction is uniform rather than oldest-first, so flooding the pool with
    /// fresh timestamps cannot push honest entries out preferentially.
    pub fn purge<R: Rng + ?Sized>(&mut self, max: usize, rng: &mut R) -> usize {
        let excess = self.peers.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }
        let mut addresses: Vec<Address> = self.peers.keys().cloned().collect();
        addresses.shuffle(rng);
        for address in addresses.into_iter().take(excess) {
            self.peers.remove(&address);
        }
        excess
    }

    /// Remove and return a random peer for which `skip` does not hold.
    pub fn take_random<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        skip: impl Fn(&Address) -> bool,
    ) -> Option<ReportedPeer> {
        let candidates: Vec<&Address> = self.peers.keys().filter(|a| !skip(a)).collect();
        let chosen = (*candidates.choose(rng)?).clone();
        self.peers.remove(&chosen)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn peer(port: u16, ts: u64) -> ReportedPeer {
        ReportedPeer::new(Address::new("peer", port), ts)
    }

    #[test]
    fn test_merge_averages_timestamps() {
        let mut pool = ReportedPeers::new();
        pool.merge([peer(1, 1_000)], |_| false);
        let outcome = pool.merge([peer(1, 3_000), peer(2, 5)], |_| false);

        assert_eq!(
            outcome,
            MergeOutcome {
                added: 1,
                updated: 1,
                excluded: 0
            }
        );
        assert_eq!(
            pool.get(&Address::new("peer", 1)).map(|p| p.last_activity),
            Some(2_000)
        );
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_merge_skips_excluded() {
        let own = Address::new("peer", 1);
        let mut pool = ReportedPeers::new();
        let outcome = pool.merge([peer(1, 0), peer(2, 0)], |a| *a == own);
        assert_eq!(outcome.excluded, 1);
        assert!(!pool.contains(&own));
        assert!(pool.contains(&Address::new("peer", 2)));
    }

    #[test]
    fn test_purge_to_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pool = ReportedPeers::new();
        pool.merge((0..50).map(|p| peer(p, 0)), |_| false);

        assert_eq!(pool.purge(60, &mut rng), 0);
        assert_eq!(pool.purge(20, &mut rng), 30);
        assert_eq!(pool.len(), 20);
    }

    #[test]
    fn test_take_random_skips() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pool = ReportedPeers::new();
        pool.merge([peer(1, 0), peer(2, 0)], |_| false);

        let busy = Address::new("peer", 1);
        let taken = pool.take_random(&mut rng, |a| *a == busy).unwrap();
        assert_eq!(taken.address, Address::new("peer", 2));
        assert!(pool.take_random(&mut rng, |a| *a == busy).is_none());
        assert_eq!(pool.len(), 1);
    }

    proptest! {
        #[test]
        fn test_pool_invariants_hold_after_merges(
            batches in prop::collection::vec(
                prop::collection::vec((0u16..200, any::<u64>()), 0..80),
                1..6,
            ),
            excluded in prop::collection::hash_set(0u16..200, 0..40),
            max in 1usize..100,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let excluded: HashSet<Address> =
                excluded.into_iter().map(|p| Address::new("peer", p)).collect();
            let mut pool = ReportedPeers::new();

            for batch in batches {
                pool.merge(batch.into_iter().map(|(p, ts)| peer(p, ts)), |a| excluded.contains(a));
                pool.purge(max, &mut rng);

                prop_assert!(pool.len() <= max);
                prop_assert!(pool.iter().all(|p| !excluded.contains(&p.address)));
            }
        }
    }
}
