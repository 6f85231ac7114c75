//! Shared-secret API key authentication.
//!
//! When the service is configured with an API key, every task route requires
//! a matching `X-API-Key` header. Without a configured key the routes are
//! open.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::AppState;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Errors that can occur during API key authentication.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    /// The `X-API-Key` header is absent.
    MissingApiKey,
    /// The header does not match the configured key.
    InvalidApiKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingApiKey => (StatusCode::UNAUTHORIZED, "missing API key"),
            Self::InvalidApiKey => (StatusCode::FORBIDDEN, "invalid API key"),
        };

        (status, message).into_response()
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()).filter(|s| !s.is_empty())
}

/// Checks the presented key against the expected one.
fn check_api_key(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match extract_api_key(headers) {
        None => Err(AuthError::MissingApiKey),
        Some(presented) if presented == expected => Ok(()),
        Some(_) => Err(AuthError::InvalidApiKey),
    }
}

/// Axum middleware that rejects requests without the configured API key.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if let Err(e) = check_api_key(state.api_key.as_deref(), req.headers()) {
        debug!(error = ?e, path = %req.uri().path(), "Rejected unauthenticated request");
        return Err(e);
    }

    Ok(next.run(req).await)
}
