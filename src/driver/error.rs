//! Driver layer error types.
//!
//! Everything the connection pool or a physical transaction can report is
//! defined here. The transaction core wraps these unchanged so callers can
//! still match on the driver's reason for failure.

use thiserror::Error;

use crate::context::ContextError;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported at the driver boundary.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Error from the sqlite library.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No connection is available and the pool is at its bound.
    #[error("connection pool exhausted ({max} connections in use)")]
    PoolExhausted { max: usize },

    /// The connection could not be opened or configured.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("statement failed: {sql}: {reason}")]
    Statement { sql: String, reason: String },

    /// Argument count does not match the statement's placeholders.
    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    /// An argument cannot be bound by this driver.
    #[error("unsupported argument: {0}")]
    UnsupportedArgument(String),

    /// The context was done before the statement ran.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The physical transaction was already finalized by the driver.
    #[error("transaction already closed")]
    Closed,
}

impl DriverError {
    /// Failure for `sql` with the given reason.
    pub fn statement(sql: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Statement {
            sql: sql.into(),
            reason: reason.into(),
        }
    }

    /// True for transient contention a caller may choose to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::PoolExhausted { .. } => true,
            DriverError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(DriverError::PoolExhausted { max: 4 }.is_retryable());
        assert!(!DriverError::statement("SELECT 1", "boom").is_retryable());
        assert!(!DriverError::Context(ContextError::Cancelled).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::statement("UPDATE t SET x=1", "no such table: t");
        assert_eq!(err.to_string(), "statement failed: UPDATE t SET x=1: no such table: t");
        assert_eq!(
            DriverError::Context(ContextError::DeadlineExceeded).to_string(),
            "context deadline exceeded"
        );
    }
}
