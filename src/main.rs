mod cli;
mod commands;
mod orchestrator;
mod seeds;

use anyhow::Result;
use clap::Parser;
use crawlcore_types::config::AppConfig;
use tracing::warn;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using built-in defaults");
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str)?;

    match cli.command {
        Commands::Crawl { seeds, seed, depth } => {
            commands::run_crawl(config, seeds, seed, depth).await?;
        }
        Commands::Status => {
            commands::run_status(config).await?;
        }
        Commands::UnblockDomain { host } => {
            commands::run_unblock_domain(config, host).await?;
        }
    }

    Ok(())
}
