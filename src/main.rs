//! Schedy webhook scheduler.
//!
//! Main entry point. Loads configuration, opens the task store, starts the
//! dispatcher and serves the HTTP API until a shutdown signal arrives.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use schedy_api::{config::MEMORY_DATABASE_URL, AppState, Config};
use schedy_core::{Clock, InMemoryTaskStore, RealClock, SqliteTaskStore, TaskStore};
use schedy_delivery::{DeliveryClient, Dispatcher};
use tracing::{info, warn};

/// Durable webhook delivery scheduler.
#[derive(Debug, Parser)]
#[command(name = "schedy", version, about)]
struct Args {
    /// Configuration file (defaults to ./schedy.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port to listen on, overriding file and environment
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_from(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
        config.validate()?;
    }

    init_tracing(&config.rust_log)?;

    info!("Starting Schedy webhook scheduler");
    info!(
        database_url = %config.database_url,
        host = %config.host,
        port = config.port,
        tick_interval_ms = config.tick_interval_ms,
        auth = config.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        "Configuration loaded"
    );

    let store = open_store(&config.database_url).await?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let client = DeliveryClient::new(config.to_client_config())
        .context("Failed to build delivery client")?;
    let mut dispatcher =
        Dispatcher::new(store.clone(), Arc::new(client), config.to_dispatch_config(), clock.clone())
            .context("Invalid dispatcher configuration")?;
    dispatcher.start().context("Failed to start dispatcher")?;

    let state = AppState::new(store, clock)
        .with_api_key(config.api_key.clone())
        .with_default_retry_interval(config.default_retry_interval_ms);
    let addr = config.parse_server_addr()?;

    schedy_api::start_server(state, addr, schedy_api::shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if !dispatcher.shutdown(config.shutdown_grace()).await {
        warn!(
            grace_secs = config.shutdown_grace_secs,
            "In-flight deliveries did not finish before the grace period expired"
        );
    }

    info!("Schedy shutdown complete");
    Ok(())
}

/// Initializes tracing; `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Opens the configured store.
async fn open_store(database_url: &str) -> Result<Arc<dyn TaskStore>> {
    if database_url == MEMORY_DATABASE_URL {
        warn!("Using in-memory task store; tasks will not survive a restart");
        return Ok(Arc::new(InMemoryTaskStore::new()));
    }

    if let Some(dir) = sqlite_parent_dir(database_url) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
    }

    let store = SqliteTaskStore::open(database_url)
        .await
        .with_context(|| format!("Failed to open task store at {database_url}"))?;
    Ok(Arc::new(store))
}

/// Directory holding the database file of a `sqlite:` URL, if any.
fn sqlite_parent_dir(database_url: &str) -> Option<&Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(':') {
        return None;
    }

    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}
