//! Outbox error types.

use clipd_database::NoteId;
use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] clipd_database::DatabaseError),

    /// Enqueue rejected: empty content
    #[error("Note content is empty")]
    EmptyContent,

    /// Enqueue rejected: automatic retry is disabled in settings
    #[error("Automatic retry is disabled")]
    AutoRetryDisabled,

    /// Enqueue rejected: queue full
    #[error("Queue full: {size} of {capacity} slots used")]
    QueueFull { size: usize, capacity: usize },

    /// Enqueue rejected: duplicate content inside the dedup window
    #[error("Duplicate: identical content already queued as note {existing_id}")]
    Duplicate { existing_id: NoteId },

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(NoteId),

    /// Fallback storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;

impl OutboxError {
    /// Whether this error is an enqueue rejection (as opposed to a
    /// storage-layer failure). Rejections are final for the request;
    /// storage failures mean "unknown outcome, try again later".
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::EmptyContent | Self::AutoRetryDisabled | Self::QueueFull { .. } | Self::Duplicate { .. }
        )
    }
}
