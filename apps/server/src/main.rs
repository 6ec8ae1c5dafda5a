#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::path::PathBuf;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use streamr_coordinator::config::Config;
use streamr_coordinator::{Coordinator, pool};
use tracing::info;

mod error;
mod routes;

use error::AppError;

/// HTTP API of the coordinator
#[derive(Debug, Parser)]
#[command(name = "streamr-server", version, about)]
struct Cli {
    /// Path to the TOML config (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    logger::init_with_level(if cli.verbose { logger::LevelFilter::DEBUG } else { logger::LevelFilter::INFO });

    let mut config = Config::from_config(cli.config.as_ref())?;
    config.apply_env_overrides()?;
    config.validate()?;
    info!("{}", config);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let pool = pool::open_local(&config.database.path, config.database.max_connections).await?;
    let coordinator = Coordinator::from_pool(pool, &config);

    run_server(addr, coordinator).await
}

async fn run_server(addr: SocketAddr, coordinator: Coordinator) -> Result<(), AppError> {
    let state = web::Data::new(coordinator);
    info!(%addr, "Listening");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
