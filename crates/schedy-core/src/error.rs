//! Error types for task persistence.
//!
//! Storage failures propagate to callers as `CoreError`; absence of a task is
//! never an error and is reported as `None` or a silent no-op instead.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for internal operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage I/O failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A task could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Returns whether the error originated in the storage layer.
    pub const fn is_database(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Decode(e) => Self::Serialization(e.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::Serialization(format!("column {index}: {source}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_errors_map_to_database() {
        let err = CoreError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_database());
        assert!(err.to_string().starts_with("Database error"));
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = CoreError::from(json_err);
        assert!(matches!(err, CoreError::Serialization(_)));
        assert!(!err.is_database());
    }
}
