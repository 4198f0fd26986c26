//! Context completion reasons.

use thiserror::Error;

/// Why a [`Context`](super::Context) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}
