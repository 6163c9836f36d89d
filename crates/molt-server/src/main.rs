use anyhow::{Context, Result};
use clap::Parser;
use molt_grace::{DrainOutcome, GracefulServer};
use tracing::{info, warn};

mod config;
mod routes;
mod telemetry;

use config::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    telemetry::init(args.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Molt Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    args.log_config();

    let server = GracefulServer::new(args.server_config(routes::router()))
        .context("Failed to read process identity")?;
    if server.is_restart_child() {
        info!("Inheriting listener from parent process (graceful restart)");
    }

    let outcome = server
        .listen_and_serve()
        .await
        .context("Failed to start server")?;

    match outcome {
        DrainOutcome::Drained => info!("Graceful shutdown complete"),
        DrainOutcome::TimedOut { remaining } => {
            warn!(remaining, "Shutdown grace expired, exiting with open connections")
        }
    }

    Ok(())
}
