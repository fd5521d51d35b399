//! Store-level error taxonomy shared by the repositories.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, closed, or I/O failure)
    #[error("Database unavailable: {0}")]
    Connection(#[source] sqlx::Error),

    /// Caller-supplied data was rejected before anything was written
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint was violated
    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Whether the error is a UNIQUE / PRIMARY KEY violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            return StoreError::Conflict("A record with this identifier already exists".to_string());
        }

        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_) => StoreError::Connection(err),
            sqlx::Error::RowNotFound => StoreError::NotFound("Record".to_string()),
            other => StoreError::Database(other),
        }
    }
}
