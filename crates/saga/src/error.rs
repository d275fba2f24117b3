//! Saga error types.

use common::{SagaId, Version};
use scheduler::SchedulerError;
use thiserror::Error;
use transport::TransportError;

use crate::status::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga is stored under the id.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A saga with the same `(uuid, saga_type)` already exists.
    #[error("Saga already exists: {0}")]
    DuplicateSaga(SagaId),

    /// The stored row changed since it was read.
    #[error("Concurrent modification of saga {id}: expected version {expected}, actual {actual}")]
    ConcurrentModification {
        id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The saga is terminal and cannot be changed any more.
    #[error("Invalid saga status for {id}: saga is {status}")]
    InvalidSagaStatus { id: SagaId, status: SagaStatus },

    /// The saga expired, or its expiry date has passed.
    #[error("Saga expired: {0}")]
    SagaExpired(SagaId),

    /// The saga was completed or failed.
    #[error("Saga {id} is closed with status {status}")]
    SagaClosed { id: SagaId, status: SagaStatus },

    /// No listener is registered for the event.
    #[error("No saga listener registered for event {0}")]
    UnknownListener(String),

    /// An incoming message payload did not match the listener's event type.
    #[error("Failed to decode message {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A persisted row could not be turned back into a record.
    #[error("Invalid saga row {id}: {reason}")]
    InvalidRecord { id: SagaId, reason: String },

    /// Any I/O-level failure. The transaction has been rolled back.
    #[error("Storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scheduling or cancelling the expiration failed.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Publishing a buffered message failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SagaError {
    /// Returns true for lost-update conflicts a caller may retry after reloading.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaError::ConcurrentModification { .. })
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
