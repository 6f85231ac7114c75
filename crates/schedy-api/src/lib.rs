//! Schedy HTTP API.
//!
//! Task CRUD over the shared [`TaskStore`], guarded by an optional shared
//! API key, plus an unauthenticated health endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use schedy_core::{Clock, TaskStore};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, shutdown_signal, start_server};

/// Default spacing between retries when a request omits `retry_interval`.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 2000;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Task persistence.
    pub store: Arc<dyn TaskStore>,
    /// Time source for validation and health timestamps.
    pub clock: Arc<dyn Clock>,
    /// Required `X-API-Key` value; `None` leaves the API open.
    pub api_key: Option<String>,
    /// Retry spacing applied when a create request omits it.
    pub default_retry_interval_ms: u64,
}

impl AppState {
    /// Creates state with no API key and the default retry interval.
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, api_key: None, default_retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS }
    }

    /// Requires `X-API-Key` to match `key`. Empty keys leave the API open.
    #[must_use]
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Overrides the default retry interval.
    #[must_use]
    pub fn with_default_retry_interval(mut self, millis: u64) -> Self {
        self.default_retry_interval_ms = millis;
        self
    }
}
