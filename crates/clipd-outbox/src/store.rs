//! Store abstraction over the two persistence backends.
//!
//! The backend is chosen once, when the store is opened: the durable SQLite
//! database when it can be opened, otherwise the blob-file fallback for the
//! rest of the process lifetime. Nothing downstream branches on which
//! backend is active.

use crate::fallback::FallbackStore;
use crate::OutboxResult;
use async_trait::async_trait;
use clipd_database::{
    Database, NewQueuedNote, NoteId, NoteStatus, QueuedNote, QueuedNotePatch,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Persistence contract for queued notes.
///
/// Missing records are `None`/`false`, never errors; errors mean the
/// storage layer itself failed and the outcome is unknown.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Persist a new note, assigning id, status and timestamps.
    async fn add(&self, note: NewQueuedNote) -> OutboxResult<QueuedNote>;

    /// Point lookup by id.
    async fn get(&self, id: NoteId) -> OutboxResult<Option<QueuedNote>>;

    /// All notes, newest first.
    async fn get_all(&self) -> OutboxResult<Vec<QueuedNote>>;

    /// Notes with the given status, newest first.
    async fn get_by_status(&self, status: NoteStatus) -> OutboxResult<Vec<QueuedNote>>;

    /// Full-record replace. Returns whether a record existed.
    async fn put(&self, note: QueuedNote) -> OutboxResult<bool>;

    /// Atomic read-merge-write of the mutable fields, refreshing
    /// `updated_at`. Returns the updated note, `None` if the id is missing.
    async fn update(&self, id: NoteId, patch: QueuedNotePatch) -> OutboxResult<Option<QueuedNote>>;

    /// Delete by id; idempotent.
    async fn delete(&self, id: NoteId) -> OutboxResult<bool>;

    /// Number of stored notes.
    async fn count(&self) -> OutboxResult<usize>;

    /// Hard capacity limit of this backend, if it has one.
    fn capacity_cap(&self) -> Option<usize> {
        None
    }
}

/// Durable store backed by the SQLite database.
pub struct DurableStore {
    db: Database,
}

impl DurableStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NoteStore for DurableStore {
    async fn add(&self, note: NewQueuedNote) -> OutboxResult<QueuedNote> {
        Ok(self.db.insert_note(note).await?)
    }

    async fn get(&self, id: NoteId) -> OutboxResult<Option<QueuedNote>> {
        Ok(self.db.get_note(id).await?)
    }

    async fn get_all(&self) -> OutboxResult<Vec<QueuedNote>> {
        Ok(self.db.list_notes().await?)
    }

    async fn get_by_status(&self, status: NoteStatus) -> OutboxResult<Vec<QueuedNote>> {
        Ok(self.db.list_notes_with_status(status).await?)
    }

    async fn put(&self, note: QueuedNote) -> OutboxResult<bool> {
        Ok(self.db.put_note(note).await?)
    }

    async fn update(&self, id: NoteId, patch: QueuedNotePatch) -> OutboxResult<Option<QueuedNote>> {
        Ok(self.db.update_note(id, patch).await?)
    }

    async fn delete(&self, id: NoteId) -> OutboxResult<bool> {
        Ok(self.db.delete_note(id).await?)
    }

    async fn count(&self) -> OutboxResult<usize> {
        Ok(self.db.count_notes().await? as usize)
    }
}

/// Open the note store, preferring the durable database.
///
/// A database open failure is a recoverable outcome, not an error: the
/// fallback blob store takes over for the rest of the process lifetime and
/// every subsequent operation routes through it.
pub async fn open_store(db_path: &Path, fallback_path: &Path) -> Arc<dyn NoteStore> {
    match Database::open(db_path).await {
        Ok(db) => {
            info!(path = %db_path.display(), "Note store using durable database");
            Arc::new(DurableStore::new(db))
        }
        Err(e) => {
            warn!(
                path = %db_path.display(),
                error = %e,
                "Primary store unavailable, activating fallback store"
            );
            Arc::new(FallbackStore::open(fallback_path.to_path_buf()).await)
        }
    }
}
