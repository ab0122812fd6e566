//! Model types for the note outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a queued note.
///
/// The durable store assigns ids through SQLite's rowid auto-increment;
/// the fallback store generates them client-side.
pub type NoteId = i64;

/// Kind of note being delivered, stored as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    /// Full-page clip.
    Page,
    /// Clipped selection.
    Selection,
    /// AI-generated summary.
    Summary,
}

impl Default for NoteKind {
    fn default() -> Self {
        Self::Page
    }
}

impl NoteKind {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Page => 0,
            Self::Selection => 1,
            Self::Summary => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Selection,
            2 => Self::Summary,
            _ => Self::Page,
        }
    }
}

/// Delivery status of a queued note.
///
/// `Success` and `Failed` are terminal: the retry machinery never mutates
/// a note again once it reaches either of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

impl Default for NoteStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "retrying" => Self::Retrying,
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Whether this status ends the note's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// A note save request awaiting delivery to the remote note service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNote {
    pub id: NoteId,
    pub content: String,
    pub kind: NoteKind,
    pub url: String,
    pub title: String,
    pub status: NoteStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Opaque caller-supplied context. Never interpreted by the queue.
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedNote {
    /// Apply a patch in place, refreshing `updated_at`.
    ///
    /// Only the mutable fields can change; `content`, `kind`, `url`,
    /// `title` and `created_at` are immutable after creation.
    pub fn apply_patch(&mut self, patch: &QueuedNotePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
        }
        if patch.clear_last_error {
            self.last_error = None;
        } else if let Some(ref last_error) = patch.last_error {
            self.last_error = Some(last_error.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// New note for insertion. The store assigns id, status and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewQueuedNote {
    pub content: String,
    pub kind: NoteKind,
    pub url: String,
    pub title: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Typed patch over the mutable fields of a [`QueuedNote`].
///
/// `clear_last_error` takes precedence over `last_error` when both are set.
/// The store refreshes `updated_at` on every applied patch.
#[derive(Debug, Clone, Default)]
pub struct QueuedNotePatch {
    pub status: Option<NoteStatus>,
    pub retry_count: Option<i32>,
    pub last_error: Option<String>,
    pub clear_last_error: bool,
}

/// Per-status counts over the queue, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub retrying: usize,
    pub success: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.retrying + self.success + self.failed
    }
}
