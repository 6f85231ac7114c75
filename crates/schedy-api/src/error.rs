//! HTTP error responses.
//!
//! Errors are rendered as short plain-text bodies with the matching status
//! code, e.g. `400 invalid body` or `404 task not found`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

/// Error returned by task handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request.
    BadRequest(&'static str),
    /// No task with the requested id.
    NotFound,
    /// The store failed; the message is shown to the client, the cause is
    /// logged.
    Internal {
        /// Client-facing message
        message: &'static str,
        /// Underlying error, logged only
        cause: String,
    },
}

impl ApiError {
    /// Wraps a storage failure.
    pub fn internal(message: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Internal { message, cause: cause.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound => (StatusCode::NOT_FOUND, "task not found"),
            Self::Internal { message, cause } => {
                error!(error = %cause, "{}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            },
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_variants() {
        assert_eq!(ApiError::BadRequest("invalid body").into_response().status(), 400);
        assert_eq!(ApiError::NotFound.into_response().status(), 404);
        assert_eq!(
            ApiError::internal("could not list tasks", "disk full").into_response().status(),
            500
        );
    }
}
