//! HTTP executor for webhook delivery.
//!
//! Builds a single POST per attempt from a [`Task`]: the payload becomes the
//! body, task headers are applied verbatim and `Content-Type` defaults to
//! `application/json`. Only a 2xx response counts as delivered.

use std::{future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use schedy_core::Task;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Boxed future returned by [`Executor::execute`].
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Result<DeliveryOutcome>> + Send + 'a>>;

/// Performs one delivery attempt for a task.
///
/// `Ok` means the endpoint accepted the webhook; any `Err` is a failed
/// attempt that the worker may retry.
pub trait Executor: Send + Sync + 'static {
    /// Delivers `task` once.
    fn execute<'a>(&'a self, task: &'a Task) -> ExecuteFuture<'a>;
}

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a whole request, including reading the response.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "Schedy/0.1".to_string(),
        }
    }
}

/// Result of a successful delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

/// reqwest-backed [`Executor`].
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// See [`DeliveryClient::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Delivers a task's webhook once.
    ///
    /// # Errors
    ///
    /// - `NetworkError` for connection failures
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `UnexpectedStatus` for any response outside 2xx
    pub async fn deliver(&self, task: &Task) -> Result<DeliveryOutcome> {
        let start_time = std::time::Instant::now();
        let span = info_span!("webhook_delivery", task_id = %task.id, url = %task.url);

        async move {
            tracing::debug!("starting webhook delivery");

            let response = match self
                .client
                .post(&task.url)
                .headers(build_headers(task))
                .body(Bytes::from(task.payload.to_body()))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        duration_ms = start_time.elapsed().as_millis(),
                        "request failed: {}",
                        e
                    );
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let status = response.status();
            let body = read_body(response).await;
            let duration = start_time.elapsed();

            if !status.is_success() {
                tracing::warn!(
                    status = status.as_u16(),
                    duration_ms = duration.as_millis(),
                    "endpoint rejected webhook"
                );
                return Err(DeliveryError::unexpected_status(status.as_u16(), body));
            }

            tracing::info!(
                status = status.as_u16(),
                duration_ms = duration.as_millis(),
                "webhook delivered"
            );
            Ok(DeliveryOutcome { status_code: status.as_u16(), body, duration })
        }
        .instrument(span)
        .await
    }
}

impl Executor for DeliveryClient {
    fn execute<'a>(&'a self, task: &'a Task) -> ExecuteFuture<'a> {
        Box::pin(self.deliver(task))
    }
}

/// Builds request headers from the task, defaulting `Content-Type`.
///
/// Header names are case-insensitive, so a caller-supplied `content-type` in
/// any casing suppresses the default. Names that differ only in case collide;
/// the one sorting first byte-wise wins and the rest are dropped.
fn build_headers(task: &Task) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let mut supplied: Vec<_> = task.headers.iter().flatten().collect();
    supplied.sort_unstable_by(|a, b| a.0.cmp(b.0));

    for (name, value) in supplied {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match parsed {
            Some((parsed_name, _)) if headers.contains_key(&parsed_name) => {
                tracing::warn!(task_id = %task.id, header = %name, "skipping duplicate header");
            },
            Some((parsed_name, value)) => {
                headers.insert(parsed_name, value);
            },
            None => tracing::warn!(task_id = %task.id, header = %name, "skipping invalid header"),
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    headers
}

async fn read_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            format!("[failed to read response body: {e}]")
        },
    }
}
