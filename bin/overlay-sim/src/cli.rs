//! Simulator command line.

use std::{path::PathBuf, time::Duration};

use bitsquare_net_peers::PeerGroupConfig;
use bitsquare_observability::LogArgs;
use clap::Parser;
use eyre::{Result, WrapErr, ensure};

/// Run an overlay of peer groups over the in-memory transport.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct SimCli {
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    /// Number of regular nodes.
    #[arg(long, default_value_t = 20)]
    pub(crate) nodes: usize,

    /// Number of seed nodes.
    #[arg(long, default_value_t = 2)]
    pub(crate) seeds: usize,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 300, value_name = "SECS")]
    pub(crate) duration: u64,

    /// Seconds between status reports.
    #[arg(long = "report-interval", default_value_t = 30, value_name = "SECS")]
    pub(crate) report_interval: u64,

    /// TOML file with peer group settings.
    #[arg(long, value_name = "FILE", env = "OVERLAY_SIM_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Override the low-priority connection limit.
    #[arg(long = "max-connections", value_name = "COUNT")]
    pub(crate) max_connections: Option<usize>,

    /// Override the reported peer pool size.
    #[arg(long = "max-reported-peers", value_name = "COUNT")]
    pub(crate) max_reported_peers: Option<usize>,

    /// Seed for every node's random number generator.
    #[arg(long = "rng-seed", value_name = "SEED")]
    pub(crate) rng_seed: Option<u64>,
}

impl SimCli {
    pub(crate) fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    pub(crate) fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval.max(1))
    }

    /// Peer group settings: defaults, then the config file, then flags.
    pub(crate) fn peer_group_config(&self) -> Result<PeerGroupConfig> {
        ensure!(self.seeds > 0, "at least one seed node is required");
        ensure!(
            self.seeds + self.nodes <= usize::from(u16::MAX - 8000),
            "too many nodes for the simulated port range"
        );

        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading {}", path.display()))?;
                toml::from_str(&raw).wrap_err_with(|| format!("parsing {}", path.display()))?
            }
            None => PeerGroupConfig::default(),
        };
        if let Some(max) = self.max_connections {
            config = config.with_max_connections_low_priority(max);
        }
        if let Some(max) = self.max_reported_peers {
            config = config.with_max_reported_peers(max);
        }
        if let Some(seed) = self.rng_seed {
            config = config.with_rng_seed(seed);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = SimCli::parse_from([
            "overlay-sim",
            "--nodes",
            "5",
            "--max-connections",
            "4",
            "--rng-seed",
            "9",
        ]);
        let config = cli.peer_group_config().unwrap();
        assert_eq!(cli.nodes, 5);
        assert_eq!(config.max_connections_low_priority, 4);
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.max_reported_peers, 1000);
    }

    #[test]
    fn test_requires_a_seed() {
        let cli = SimCli::parse_from(["overlay-sim", "--seeds", "0"]);
        assert!(cli.peer_group_config().is_err());
    }
}
