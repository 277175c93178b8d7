use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while executing a transaction saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Input failed validation before any state was touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Row absent or owned by a different user; no audit request was sent.
    #[error("Transaction not found")]
    NotFound,

    /// The saga aborted: the audit acknowledgement timed out, came back
    /// failed, or a publish/store step failed after the local transaction
    /// opened. The local change was rolled back and compensation published.
    #[error("Audit log creation failed or timed out: {0}")]
    DistributedTransaction(String),

    /// Store failure outside the distributed window.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
