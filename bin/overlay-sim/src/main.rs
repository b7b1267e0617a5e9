//! Overlay simulator binary.

mod cli;
mod sim;

use clap::Parser;
use tracing::info;

use crate::{cli::SimCli, sim::Simulation};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = SimCli::parse();
    bitsquare_observability::init_logging(&cli.logs)?;

    let config = cli.peer_group_config()?;
    let sim = Simulation::start(cli.seeds, cli.nodes, &config)?;

    let deadline = tokio::time::sleep(cli.duration());
    tokio::pin!(deadline);
    let mut reports = tokio::time::interval(cli.report_interval());
    // The first tick completes immediately; skip it.
    reports.tick().await;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = reports.tick() => sim.report().await,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    sim.report().await;
    for (degree, count) in sim.degree_distribution().await {
        info!(degree, count, "authenticated peers per node");
    }
    sim.shutdown().await;
    Ok(())
}
