//! Task endpoints: create, list, get, delete by id and filtered bulk delete.
//!
//! Error bodies are plain text so clients can match on them directly, e.g.
//! `400 time cannot be in past`.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use schedy_core::{unix_secs, Payload, Task, TaskFilter, TaskId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{error::ApiError, AppState};

/// Header that opts a create request into duplicate detection.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Body of `POST /tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Delivery target.
    #[serde(default)]
    pub url: String,
    /// Headers sent with the delivery.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Request body; absent means JSON `null`.
    #[serde(default)]
    pub payload: Payload,
    /// RFC 3339 fire time.
    #[serde(default)]
    pub execute_at: String,
    /// Retries after the first attempt.
    #[serde(default)]
    pub retries: u32,
    /// Milliseconds between attempts.
    #[serde(default)]
    pub retry_interval: Option<u64>,
}

/// Query of `DELETE /tasks`. Empty values count as absent.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteTasksQuery {
    /// Exact URL to match.
    pub url: Option<String>,
    /// RFC 3339 upper bound, exclusive.
    pub before: Option<String>,
    /// RFC 3339 lower bound, exclusive.
    pub after: Option<String>,
}

/// Response of `DELETE /tasks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteTasksResponse {
    /// Number of tasks removed.
    pub deleted: usize,
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl DeleteTasksQuery {
    fn into_filter(self) -> Result<TaskFilter, ApiError> {
        let before = match non_empty(self.before) {
            Some(raw) => Some(
                parse_rfc3339(&raw)
                    .ok_or(ApiError::BadRequest("invalid before timestamp (RFC3339 required)"))?,
            ),
            None => None,
        };
        let after = match non_empty(self.after) {
            Some(raw) => Some(
                parse_rfc3339(&raw)
                    .ok_or(ApiError::BadRequest("invalid after timestamp (RFC3339 required)"))?,
            ),
            None => None,
        };

        Ok(TaskFilter { url: non_empty(self.url), before, after })
    }
}

/// Looks for a stored task with the same URL and fire second.
///
/// Listing failures are logged and treated as "no duplicate".
async fn find_duplicate(state: &AppState, url: &str, execute_at_secs: u64) -> Option<Task> {
    match state.store.list_tasks().await {
        Ok(tasks) => tasks
            .into_iter()
            .find(|t| t.url == url && t.execute_at_secs() == execute_at_secs),
        Err(e) => {
            warn!(error = %e, "Duplicate lookup failed, creating task");
            None
        },
    }
}

/// Schedules a new task.
///
/// When an `Idempotency-Key` header is sent or the URL is non-empty, an
/// existing task with the same URL and fire second is returned with 200
/// instead of creating another one.
#[instrument(name = "create_task", skip(state, headers, body))]
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: CreateTaskRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest("invalid body"))?;

    let execute_at = parse_rfc3339(&req.execute_at)
        .ok_or(ApiError::BadRequest("invalid time (ISO required)"))?;

    if execute_at < state.clock.now_utc() {
        return Err(ApiError::BadRequest("time cannot be in past"));
    }

    if headers.contains_key(IDEMPOTENCY_KEY_HEADER) || !req.url.is_empty() {
        if let Some(existing) = find_duplicate(&state, &req.url, unix_secs(execute_at)).await {
            debug!(task_id = %existing.id, url = %existing.url, "Returning existing task");
            return Ok((StatusCode::OK, Json(existing)).into_response());
        }
    }

    let task = Task {
        id: TaskId::new(),
        url: req.url,
        execute_at,
        headers: req.headers,
        payload: req.payload,
        retries: req.retries,
        retry_interval: req.retry_interval.unwrap_or(state.default_retry_interval_ms),
    };

    state.store.save(&task).await.map_err(|e| ApiError::internal("could not save task", e))?;

    info!(
        task_id = %task.id,
        url = %task.url,
        execute_at = %task.execute_at,
        retries = task.retries,
        "Task scheduled"
    );

    Ok((StatusCode::CREATED, Json(task)).into_response())
}

/// Lists every stored task in fire-time order.
#[instrument(name = "list_tasks", skip(state))]
pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks =
        state.store.list_tasks().await.map_err(|e| ApiError::internal("could not list tasks", e))?;
    Ok(Json(tasks))
}

/// Fetches one task by id.
#[instrument(name = "get_task", skip(state))]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = TaskId::from(id);
    state
        .store
        .get_task(&id)
        .await
        .map_err(|e| ApiError::internal("could not get task", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Deletes one task by id, using its stored fire time.
#[instrument(name = "delete_task", skip(state))]
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = TaskId::from(id);
    let task = state
        .store
        .get_task(&id)
        .await
        .map_err(|e| ApiError::internal("could not get task", e))?
        .ok_or(ApiError::NotFound)?;

    state
        .store
        .delete(&task.id, task.execute_at_secs())
        .await
        .map_err(|e| ApiError::internal("could not delete task", e))?;

    info!(task_id = %task.id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Deletes every task matching the query filters.
///
/// At least one of `url`, `before` or `after` is required.
#[instrument(name = "delete_tasks", skip(state))]
pub async fn delete_tasks(
    State(state): State<AppState>,
    Query(query): Query<DeleteTasksQuery>,
) -> Result<Json<DeleteTasksResponse>, ApiError> {
    let filter = query.into_filter()?;
    if filter.is_empty() {
        return Err(ApiError::BadRequest("at least one filter required (url, before, or after)"));
    }

    let deleted = state
        .store
        .delete_tasks(&filter)
        .await
        .map_err(|e| ApiError::internal("could not delete tasks", e))?;

    info!(deleted, url = ?filter.url, before = ?filter.before, after = ?filter.after, "Tasks deleted");
    Ok(Json(DeleteTasksResponse { deleted }))
}
