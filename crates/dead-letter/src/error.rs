use common::Version;
use thiserror::Error;

use crate::model::{FailedEventId, FailedEventStatus};

/// Errors raised by failed-event persistence and replay.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    /// No failed event with this id belongs to the service.
    #[error("Failed event not found: {0}")]
    NotFound(FailedEventId),

    /// The event is already closed.
    #[error("Failed event {id} is {status} and cannot be changed")]
    InvalidStatus {
        id: FailedEventId,
        status: FailedEventStatus,
    },

    /// Another writer updated the row first.
    #[error("Concurrency conflict for failed event {id}: expected version {expected}")]
    ConcurrencyConflict {
        id: FailedEventId,
        expected: Version,
    },

    /// A stored row could not be mapped back.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for dead-letter operations.
pub type Result<T> = std::result::Result<T, DeadLetterError>;
