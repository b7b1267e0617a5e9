use eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::LogArgs;

/// Build the log filter for `args`.
///
/// `--quiet` shows only errors. Otherwise `RUST_LOG` wins over the verbosity
/// level, and `--log.filter` directives are added on top. Directives that do
/// not parse are left out.
pub fn env_filter(args: &LogArgs) -> EnvFilter {
    build_filter(args).0
}

/// The filter plus every `--log.filter` directive that failed to parse, with
/// its error.
fn build_filter(args: &LogArgs) -> (EnvFilter, Vec<(String, String)>) {
    if args.quiet {
        return (EnvFilter::new("error"), Vec::new());
    }

    let base_level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));
    let mut rejected = Vec::new();

    if let Some(custom) = &args.filter {
        for directive in custom.split(',') {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(error) => rejected.push((directive.to_owned(), error.to_string())),
            }
        }
    }
    (filter, rejected)
}

/// Install the global subscriber. Fails if one is already installed.
///
/// Rejected `--log.filter` directives are reported through the new subscriber.
pub fn init_logging(args: &LogArgs) -> Result<()> {
    let (filter, rejected) = build_filter(args);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        builder
            .json()
            .try_init()
            .map_err(|e| eyre::eyre!("failed to install JSON logger: {e}"))?;
    } else {
        builder
            .try_init()
            .map_err(|e| eyre::eyre!("failed to install logger: {e}"))?;
    }
    for (directive, error) in rejected {
        tracing::warn!(%directive, %error, "ignoring invalid log directive");
    }
    Ok(())
}
