use thiserror::Error;
use transport::TransportError;

use crate::ScheduledOperationId;

/// Errors that can occur when interacting with the scheduler store.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The operation to extract does not exist.
    #[error("Scheduled operation not found: {0}")]
    ScheduledOperationNotFound(ScheduledOperationId),

    /// An operation with the same id is already stored.
    #[error("Scheduled operation already exists: {0}")]
    DuplicateOperation(ScheduledOperationId),

    /// A persisted row could not be turned back into an operation.
    #[error("Invalid scheduled operation row {id}: {reason}")]
    InvalidRow { id: String, reason: String },

    /// Any I/O-level failure. The transaction has been rolled back.
    #[error("Storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Publishing a due command failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
