use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use streamr_coordinator::config::Config;
use streamr_coordinator::orchestrator::Worker;
use streamr_coordinator::pool;

/// Background worker: stats collector, spot-check prober, liveness reaper
/// and retention cleanup.
#[derive(Debug, Parser)]
#[command(name = "streamr-worker", version, about)]
struct Cli {
    /// Path to the TOML config (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    logger::init_with_level(if cli.verbose { logger::LevelFilter::DEBUG } else { logger::LevelFilter::INFO });

    let mut config = Config::from_config(cli.config.as_ref()).context("Failed to load configuration")?;
    config.apply_env_overrides()?;
    config.validate()?;
    info!("{}", config);

    let pool = pool::open_local(&config.database.path, config.database.max_connections).await?;
    info!(path = %config.database.path.display(), "Database ready");

    Worker::start(config, pool).await
}
