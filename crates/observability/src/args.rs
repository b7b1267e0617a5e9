//! Logging CLI arguments.

use clap::Args;
use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Default, Args, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub struct LogArgs {
    /// Silence all output except errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[serde(skip)]
    pub verbosity: u8,

    /// Log filter directive (e.g., "bitsquare_net_peers=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json")]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        logs: LogArgs,
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from(["sim", "-vv", "--log.filter", "bitsquare_net_peers=trace", "--log.json"]);
        assert_eq!(cli.logs.verbosity, 2);
        assert_eq!(cli.logs.filter.as_deref(), Some("bitsquare_net_peers=trace"));
        assert!(cli.logs.json);
        assert!(!cli.logs.quiet);
    }

    #[test]
    fn test_deserialize_skips_verbosity() {
        let args: LogArgs = toml::from_str("quiet = true").unwrap();
        assert!(args.quiet);
        assert_eq!(args.verbosity, 0);
        assert!(args.filter.is_none());
    }
}
