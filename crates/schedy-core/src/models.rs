//! Task model and strongly-typed identifiers.
//!
//! A [`Task`] is the only persisted entity: a webhook to POST to `url` at
//! `execute_at`, retried up to `retries` times spaced `retry_interval`
//! milliseconds apart.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier.
///
/// Assigned once at creation and immutable afterwards. Generated ids are
/// UUID v4 strings, but any string round-trips through the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Creates a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Request body sent to the webhook target.
///
/// Untagged on the wire: a JSON string is raw text and is sent verbatim,
/// anything else is structured JSON serialized at delivery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Raw text body.
    Text(String),
    /// Structured JSON body.
    Json(serde_json::Value),
}

impl Default for Payload {
    fn default() -> Self {
        Self::Json(serde_json::Value::Null)
    }
}

impl Payload {
    /// Renders the request body bytes.
    ///
    /// A JSON value that fails to serialize yields an empty body.
    pub fn to_body(&self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.as_bytes().to_vec(),
            Self::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
        }
    }
}

/// A scheduled webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Delivery target.
    pub url: String,
    /// Absolute fire time.
    pub execute_at: DateTime<Utc>,
    /// Headers applied verbatim to the delivery request.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Request body.
    #[serde(default)]
    pub payload: Payload,
    /// Maximum number of retries after the first attempt.
    #[serde(default)]
    pub retries: u32,
    /// Minimum spacing between consecutive attempts, in milliseconds.
    #[serde(default)]
    pub retry_interval: u64,
}

impl Task {
    /// Creates a task with a fresh id, no headers, a null payload and no
    /// retries.
    pub fn new(url: impl Into<String>, execute_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            url: url.into(),
            execute_at,
            headers: None,
            payload: Payload::default(),
            retries: 0,
            retry_interval: 0,
        }
    }

    /// Sets the request payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Sets the retry budget and spacing.
    #[must_use]
    pub fn with_retries(mut self, retries: u32, retry_interval: Duration) -> Self {
        self.retries = retries;
        self.retry_interval = u64::try_from(retry_interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Unix seconds of `execute_at`, clamped at zero.
    pub fn execute_at_secs(&self) -> u64 {
        unix_secs(self.execute_at)
    }

    /// Spacing between attempts as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }
}

/// Whole unix seconds of a timestamp; instants before the epoch clamp to 0.
pub fn unix_secs(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}

/// Predicates for bulk deletion.
///
/// A task matches when every supplied predicate holds. An empty filter
/// matches every task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Exact URL match; ignored when empty.
    pub url: Option<String>,
    /// Matches tasks with `execute_at` strictly before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Matches tasks with `execute_at` strictly after this instant.
    pub after: Option<DateTime<Utc>>,
}

impl TaskFilter {
    /// Returns whether no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.url.as_deref().is_none_or(str::is_empty) && self.before.is_none() && self.after.is_none()
    }

    /// Returns whether `task` satisfies every supplied predicate.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            if task.url != url {
                return false;
            }
        }
        if let Some(before) = self.before {
            if task.execute_at >= before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if task.execute_at <= after {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn string_payload_deserializes_as_text() {
        let payload: Payload = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(payload, Payload::Text("hello".into()));
        assert_eq!(payload.to_body(), b"hello");
    }

    #[test]
    fn structured_payload_is_serialized() {
        let payload: Payload = serde_json::from_value(json!({"a": 1})).unwrap();
        assert!(matches!(payload, Payload::Json(_)));
        assert_eq!(payload.to_body(), br#"{"a":1}"#);
    }

    #[test]
    fn missing_payload_renders_null() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "url": "http://example.com",
            "execute_at": "2030-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(task.payload.to_body(), b"null");
        assert_eq!(task.retries, 0);
        assert!(task.headers.is_none());
    }

    #[test]
    fn task_serializes_expected_fields() {
        let task = Task::new("http://example.com/hook", at(1_900_000_000))
            .with_retries(3, Duration::from_millis(1500));
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["url"], "http://example.com/hook");
        assert_eq!(value["execute_at"], "2030-03-17T17:46:40Z");
        assert_eq!(value["headers"], serde_json::Value::Null);
        assert_eq!(value["retries"], 3);
        assert_eq!(value["retry_interval"], 1500);
    }

    #[test]
    fn pre_epoch_seconds_clamp_to_zero() {
        assert_eq!(unix_secs(at(-5)), 0);
        assert_eq!(unix_secs(at(42)), 42);
    }

    #[test]
    fn filter_requires_every_predicate() {
        let task = Task::new("http://a", at(100));
        let filter = TaskFilter {
            url: Some("http://a".into()),
            before: Some(at(200)),
            after: Some(at(50)),
        };
        assert!(filter.matches(&task));

        let wrong_url = TaskFilter { url: Some("http://b".into()), ..filter.clone() };
        assert!(!wrong_url.matches(&task));

        let bounds_exclusive = TaskFilter { url: None, before: Some(at(100)), after: None };
        assert!(!bounds_exclusive.matches(&task));
        let after_exclusive = TaskFilter { url: None, before: None, after: Some(at(100)) };
        assert!(!after_exclusive.matches(&task));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = TaskFilter { url: Some(String::new()), ..TaskFilter::default() };
        assert!(filter.is_empty());
        assert!(filter.matches(&Task::new("http://x", at(1))));
    }
}
