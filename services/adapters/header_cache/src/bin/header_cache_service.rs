//! Header Cache Service
//!
//! Runs the header cache against a remote message service, either as a
//! long-lived process that keeps the replica warm or for one-off queries.

use anyhow::{Context, Result};
use cache_config::{load_config, HeaderCacheConfig};
use clap::{Parser, Subcommand};
use header_cache_adapter::{HeaderCache, HeaderRefresher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "header_cache_service", version, about = "Local replica of remote message headers")]
struct Cli {
    /// Base configuration file (defaults to config/header_cache.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay from config/environments/<name>.toml
    #[arg(short, long)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep the cache synchronized until Ctrl+C
    Serve,
    /// Print the header with this identifier
    Get { identifier: String },
    /// Print headers that arrived at or after a Unix time
    Since { timestamp: u32 },
    /// Print headers expiring at or after a Unix time
    ExpiringAfter { timestamp: u32 },
    /// Sync once and print cache statistics
    Stats,
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.environment.as_deref())?;

    init_logging(&config)?;

    match cli.command {
        Command::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        command => run(command, &config).await,
    }
}

fn init_logging(config: &HeaderCacheConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?
        .add_directive("header_cache_adapter=debug".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(command: Command, config: &HeaderCacheConfig) -> Result<()> {
    info!("Opening header cache for {}", config.remote.base_url());
    let cache = Arc::new(HeaderCache::open(config).await?);

    let result = match command {
        Command::Serve => serve(cache.clone(), config).await,
        Command::Get { identifier } => {
            let header = cache.find_by_identifier(&identifier).await?;
            println!("{}", serde_json::to_string_pretty(&header)?);
            Ok(())
        }
        Command::Since { timestamp } => {
            let headers = cache.find_since(timestamp).await?;
            println!("{}", serde_json::to_string_pretty(&headers)?);
            Ok(())
        }
        Command::ExpiringAfter { timestamp } => {
            let headers = cache.find_expiring_after(timestamp).await?;
            println!("{}", serde_json::to_string_pretty(&headers)?);
            Ok(())
        }
        Command::Stats => {
            cache.sync().await?;
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
            Ok(())
        }
        Command::PrintConfig => Ok(()),
    };

    cache.close();
    result
}

async fn serve(cache: Arc<HeaderCache>, config: &HeaderCacheConfig) -> Result<()> {
    // Warm the replica before waiting; a failure is retried on demand
    if let Err(e) = cache.sync().await {
        warn!("Initial sync failed: {}", e);
    }
    info!("Cache holds {} message headers", cache.count());

    let refresher = config
        .sync
        .background_refresh()
        .map(|period| HeaderRefresher::spawn(cache.clone(), period));
    if refresher.is_none() {
        info!("Background refresh disabled, syncing on lookup only");
    }

    info!("Service running. Press Ctrl+C to stop.");
    signal::ctrl_c().await?;

    info!("Shutting down header cache service");
    if let Some(refresher) = refresher {
        refresher.shutdown().await;
    }

    let stats = cache.stats();
    info!(
        "Final stats: {} headers, {} passes, {} inserted, {} pruned",
        stats.count, stats.sync_passes, stats.headers_inserted, stats.headers_pruned
    );
    Ok(())
}
