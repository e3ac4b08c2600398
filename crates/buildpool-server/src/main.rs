//! buildpool daemon
//!
//! Hosts the pools, writes their capability files, runs the configured
//! local workers and serves the submission, admin and log surface.

mod config;
mod daemon;
mod error;

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::ServerConfig;
use daemon::Daemon;

/// buildpool scheduler daemon.
#[derive(Parser, Debug)]
#[command(name = "buildpoold", version, about = "buildpool scheduler daemon")]
struct Args {
    /// JSON config file
    #[arg(long, short, env = "BUILDPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Directory for capability files, overrides the config file
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    }
    .with_overrides(args.listen, args.state_dir);

    info!(
        listen = %config.scheduler.listen_addr,
        state_dir = %config.scheduler.state_dir.display(),
        pools = config.scheduler.pools.len(),
        workers = config.workers.len(),
        "Starting buildpool daemon"
    );

    let daemon = Daemon::start(&config).await?;
    for path in daemon.cap_files() {
        info!(path = %path.display(), "Capability file ready");
    }
    info!(
        pools = ?daemon.state().scheduler.pool_names(),
        local_workers = daemon.worker_count(),
        "Daemon ready"
    );

    let listener = daemon::bind(&config.scheduler.listen_addr).await?;
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    };

    daemon.serve(listener, shutdown).await?;
    info!("buildpool daemon stopped");
    Ok(())
}
