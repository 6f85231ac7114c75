//! Configuration management for the Schedy service.

use std::{net::SocketAddr, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use schedy_delivery::{ClientConfig, DispatchConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "schedy.toml";
const ENV_PREFIX: &str = "SCHEDY_";

/// In-process database URL that selects the in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Service configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `SCHEDY_` (highest priority)
/// 2. Configuration file (`schedy.toml`, or the path given on the command
///    line)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use schedy_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    // Storage
    /// SQLite URL of the task database, or `memory` for a non-durable store.
    ///
    /// Environment variable: `SCHEDY_DATABASE_URL`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `SCHEDY_HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `SCHEDY_PORT`
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret required in `X-API-Key`. Unset or empty disables auth.
    ///
    /// Environment variable: `SCHEDY_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    // Dispatch
    /// Milliseconds between dispatcher polls.
    ///
    /// Environment variable: `SCHEDY_TICK_INTERVAL_MS`
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Maximum deliveries in progress at once.
    ///
    /// Environment variable: `SCHEDY_MAX_CONCURRENT_DELIVERIES`
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    /// Seconds before start-up covered by the first poll. Unset covers every
    /// overdue task left in the store.
    ///
    /// Environment variable: `SCHEDY_STARTUP_LOOKBACK_SECS`
    #[serde(default)]
    pub startup_lookback_secs: Option<u64>,
    /// Seconds to wait for in-flight deliveries on shutdown.
    ///
    /// Environment variable: `SCHEDY_SHUTDOWN_GRACE_SECS`
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    // Delivery
    /// HTTP request timeout for webhook delivery in seconds.
    ///
    /// Environment variable: `SCHEDY_DELIVERY_TIMEOUT_SECS`
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Retry spacing for tasks created without `retry_interval`.
    ///
    /// Environment variable: `SCHEDY_DEFAULT_RETRY_INTERVAL_MS`
    #[serde(default = "default_retry_interval_ms")]
    pub default_retry_interval_ms: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is not set.
    ///
    /// Environment variable: `SCHEDY_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `schedy.toml`, and environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], reading `path` instead of `schedy.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = path.map_or_else(|| Toml::file(CONFIG_FILE), Toml::file);
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the in-memory store was requested.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    /// Converts to the dispatcher configuration.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            startup_lookback: self.startup_lookback_secs.map(Duration::from_secs),
        }
    }

    /// Converts to the delivery client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_secs),
            ..ClientConfig::default()
        }
    }

    /// Grace period for in-flight deliveries on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_url.is_empty() {
            anyhow::bail!("database_url must not be empty");
        }

        if self.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be greater than 0");
        }

        if self.max_concurrent_deliveries == 0 {
            anyhow::bail!("max_concurrent_deliveries must be greater than 0");
        }

        if self.delivery_timeout_secs == 0 {
            anyhow::bail!("delivery_timeout_secs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            host: default_host(),
            port: default_port(),
            api_key: None,
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            startup_lookback_secs: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            default_retry_interval_ms: default_retry_interval_ms(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://data/schedy.db".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_tick_interval_ms() -> u64 {
    schedy_delivery::DEFAULT_TICK_INTERVAL_SECONDS * 1000
}

fn default_max_concurrent_deliveries() -> usize {
    schedy_delivery::DEFAULT_MAX_CONCURRENT_DELIVERIES
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_delivery_timeout_secs() -> u64 {
    schedy_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_retry_interval_ms() -> u64 {
    crate::DEFAULT_RETRY_INTERVAL_MS
}

fn default_log_level() -> String {
    "info".to_string()
}
