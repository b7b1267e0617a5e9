//! A set of peer groups sharing one in-memory network.

use std::collections::{BTreeMap, HashSet};

use bitsquare_net_memory::MemoryNetwork;
use bitsquare_net_peers::{PeerGroup, PeerGroupConfig, PeerGroupHandle, PeerGroupStatus};
use bitsquare_net_primitives::Address;
use eyre::Result;
use futures::future::join_all;
use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};
use tracing::{info, warn};

const SEED_BASE_PORT: u16 = 8000;
const HOST: &str = "127.0.0.1";

pub(crate) struct Simulation {
    _network: MemoryNetwork,
    seeds: Vec<PeerGroupHandle>,
    nodes: Vec<PeerGroupHandle>,
}

impl Simulation {
    /// Start `seeds` seed nodes pointed at each other, then `nodes` regular
    /// nodes each bootstrapping from a random seed.
    pub(crate) fn start(seeds: usize, nodes: usize, config: &PeerGroupConfig) -> Result<Self> {
        // Nothing reads the send log here.
        let network = MemoryNetwork::new().with_sent_log_limit(0);
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut next_port = SEED_BASE_PORT;
        let mut spawn = |index: usize| {
            let address = Address::new(HOST, next_port);
            next_port += 1;
            let mut config = config.clone();
            config.rng_seed = config.rng_seed.map(|seed| seed.wrapping_add(index as u64));
            (
                address.clone(),
                PeerGroup::spawn(network.add_node(address), config),
            )
        };

        let seed_nodes: Vec<_> = (0..seeds).map(&mut spawn).collect();
        let seed_addresses: Vec<Address> = seed_nodes.iter().map(|(a, _)| a.clone()).collect();
        let seed_set: HashSet<Address> = seed_addresses.iter().cloned().collect();

        for (index, (_, handle)) in seed_nodes.iter().enumerate() {
            let first = seed_addresses
                .get((index + 1) % seeds)
                .cloned()
                .ok_or_else(|| eyre::eyre!("no seed nodes"))?;
            handle.authenticate_to_seed_node(first, seed_set.clone())?;
        }

        let mut regular = Vec::with_capacity(nodes);
        for index in 0..nodes {
            let (_, handle) = spawn(seeds + index);
            let first = seed_addresses
                .choose(&mut rng)
                .cloned()
                .ok_or_else(|| eyre::eyre!("no seed nodes"))?;
            handle.authenticate_to_seed_node(first, seed_set.clone())?;
            regular.push(handle);
        }

        info!(seeds, nodes, "simulation started");
        Ok(Self {
            _network: network,
            seeds: seed_nodes.into_iter().map(|(_, h)| h).collect(),
            nodes: regular,
        })
    }

    async fn statuses(handles: &[PeerGroupHandle]) -> Vec<PeerGroupStatus> {
        join_all(handles.iter().map(|h| h.status()))
            .await
            .into_iter()
            .filter_map(|status| status.map_err(|e| warn!(%e, "status unavailable")).ok())
            .collect()
    }

    /// Log a summary line for seeds and for regular nodes.
    pub(crate) async fn report(&self) {
        for (role, handles) in [("seed", &self.seeds), ("node", &self.nodes)] {
            let statuses = Self::statuses(handles).await;
            if statuses.is_empty() {
                continue;
            }
            let degrees: Vec<usize> = statuses.iter().map(|s| s.authenticated).collect();
            let min = degrees.iter().copied().min().unwrap_or_default();
            let max = degrees.iter().copied().max().unwrap_or_default();
            let mean = degrees.iter().sum::<usize>() as f64 / degrees.len() as f64;
            let reported = statuses.iter().map(|s| s.reported).sum::<usize>() / statuses.len();
            let handshakes: usize = statuses.iter().map(|s| s.handshakes).sum();
            let isolated = degrees.iter().filter(|d| **d == 0).count();
            info!(
                role,
                count = statuses.len(),
                min,
                mean = format_args!("{mean:.1}"),
                max,
                isolated,
                reported_avg = reported,
                handshakes,
                "overlay status"
            );
        }
    }

    /// Number of regular nodes per authenticated-peer count.
    pub(crate) async fn degree_distribution(&self) -> BTreeMap<usize, usize> {
        let mut distribution = BTreeMap::new();
        for status in Self::statuses(&self.nodes).await {
            *distribution.entry(status.authenticated).or_default() += 1;
        }
        distribution
    }

    pub(crate) async fn shutdown(self) {
        let handles = self.seeds.iter().chain(&self.nodes);
        for result in join_all(handles.map(|h| h.shutdown())).await {
            if let Err(error) = result {
                warn!(%error, "peer group already stopped");
            }
        }
    }
}
