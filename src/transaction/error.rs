//! Transaction error types.

use thiserror::Error;

use crate::driver::DriverError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The driver failed to begin, run a statement, commit or roll back.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The handle's physical transaction was already committed or rolled back.
    #[error("transaction {tx_id} is already finalized")]
    Finalized { tx_id: String },

    /// The unit of work panicked; holds the panic message.
    #[error("{0}")]
    Panicked(String),

    /// A row could not be converted into the requested type.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The query could not be rewritten into a count query.
    #[error("cannot build count query: {0}")]
    Count(String),
}

impl TransactionError {
    /// Check if this error is worth retrying from the top.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionError::Driver(e) if e.is_retryable())
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, TransactionError::Finalized { .. })
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TransactionError::Panicked(_))
    }
}
