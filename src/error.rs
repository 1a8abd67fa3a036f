//! Error types for the worker pool
//!
//! The store layer classifies every failure into a small taxonomy that the
//! callers act on mechanically: transient errors are retried with backoff,
//! schema errors disable the affected operation for the process lifetime,
//! and everything else bubbles up to the dispatcher scope.

use std::time::Duration;
use thiserror::Error;

/// Result alias for claim-store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by claim-store operations
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Transient backend failure (network, pool exhaustion, serialization retry)
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The backend is missing a column or table the operation needs
    #[error("schema error: {0}")]
    Schema(String),

    /// The requested backend is not configured
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// A store call exceeded its hard deadline
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other database failure
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Check if this error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }

    /// Check if this error means the backend schema is missing pieces
    pub fn is_schema(&self) -> bool {
        matches!(self, StoreError::Schema(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                // undefined_column / undefined_table: the backend has not been
                // migrated for this operation yet.
                match db.code().as_deref() {
                    Some("42703") | Some("42P01") => StoreError::Schema(db.message().to_string()),
                    // serialization_failure / deadlock_detected resolve on retry
                    Some("40001") | Some("40P01") => StoreError::Transient(db.message().to_string()),
                    _ => StoreError::Database(db.message().to_string()),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StoreError::Transient(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

/// Maximum stored length for executor error messages
pub const MAX_ERROR_MESSAGE_BYTES: usize = 1024;

/// Truncate an executor error message to the storable size.
///
/// Cuts on a char boundary so the result is always valid UTF-8.
pub fn truncate_error_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_BYTES {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
