use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use linkcut::config::{Args, Config};
use linkcut::{server, storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let args = Args::parse();
    let config = Config::from_env()?.with_args(args);
    info!("Loaded configuration");

    // Initialize storage
    let store = storage::open(&config).await?;
    info!("Storage initialized successfully");

    server::run(config, store, server::shutdown_signal()).await
}
