use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use upwatch_service::{
    ConfigLoader, KvStore, LibsqlStore, LocationLookup, Orchestrator, TraceLocation,
};

#[derive(Parser)]
#[command(name = "upwatch", about = "Uptime monitoring and alerting core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single check cycle and exit.
    Once,
    /// Run cycles on a fixed interval (external-scheduler stand-in).
    Run {
        /// Seconds between cycles.
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_tracing();

    let cli = Cli::parse();
    let mut loader = ConfigLoader::load(cli.config.as_ref())?;

    let store: Arc<dyn KvStore> =
        Arc::new(LibsqlStore::open(&loader.current().store.path).await?);
    // Shared across reloads so the location stays cached for the process
    // lifetime.
    let location: Arc<dyn LocationLookup> = Arc::new(TraceLocation::new()?);

    match cli.command {
        Command::Once => {
            let orchestrator =
                Orchestrator::new(loader.current().clone(), store, location)?;
            let report = orchestrator.run_cycle().await?;
            info!(
                up = report.up,
                down = report.down,
                notifications = report.notifications_attempted,
                "cycle finished"
            );
        }
        Command::Run { interval } => {
            info!(interval, "starting cycle loop");
            let mut timer = tokio::time::interval(Duration::from_secs(interval));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                // Pick up config edits between cycles; a broken file keeps
                // the last good configuration.
                let config = loader.reload().clone();
                let orchestrator =
                    Orchestrator::new(config, store.clone(), location.clone())?;
                if let Err(e) = orchestrator.run_cycle().await {
                    error!("Cycle failed: {e:#}");
                }
            }
        }
    }

    Ok(())
}
