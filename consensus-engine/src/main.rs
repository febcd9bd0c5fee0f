//! Consensus engine command line entry point
//!
//! Without a subcommand, loads configuration, registers the configured
//! providers and prints a health report. See `consensus-engine --help`.

use anyhow::Result;
use clap::Parser;
use consensus_engine::Cli;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("🚀 Signal Consensus Engine");
    info!("==========================");

    Cli::parse().run().await
}
