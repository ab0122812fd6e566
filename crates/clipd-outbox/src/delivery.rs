//! Delivery collaborator seam.
//!
//! The outbound "create note" call lives outside this crate; the queue only
//! sees it through [`NoteDelivery`]. Any non-success outcome is treated as
//! retryable; classifying non-retryable errors (auth, validation) is the
//! caller's job, and such requests must never be enqueued.

use async_trait::async_trait;
use clipd_database::NoteKind;

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub message: String,
}

impl DeliveryOutcome {
    pub fn delivered() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Sends a note to the remote note service.
#[async_trait]
pub trait NoteDelivery: Send + Sync {
    async fn deliver(&self, content: &str, kind: NoteKind) -> DeliveryOutcome;
}
