//! Queue manager: enqueue, dequeue, listing, updates and cleanup.

use crate::store::NoteStore;
use crate::{OutboxError, OutboxResult, SettingsProvider};
use chrono::{Duration as ChronoDuration, Utc};
use clipd_database::{
    NewQueuedNote, NoteId, NoteStatus, QueueStats, QueuedNote, QueuedNotePatch,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Window during which identical content is rejected from re-enqueueing.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Cleanup criteria beyond the default success-retention sweep.
#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Also remove every note with this status.
    pub status: Option<NoteStatus>,
    /// Also remove every note created longer ago than this.
    pub older_than: Option<Duration>,
}

/// Manager for the outbound note queue.
///
/// All operations go through whichever [`NoteStore`] backend was chosen at
/// startup; capacity and dedup rules are enforced here, on enqueue, never
/// retroactively.
pub struct OutboxQueue {
    store: Arc<dyn NoteStore>,
    settings: Arc<dyn SettingsProvider>,
}

impl OutboxQueue {
    pub fn new(store: Arc<dyn NoteStore>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { store, settings }
    }

    /// Queue a note for delivery.
    ///
    /// Rejections (`EmptyContent`, `AutoRetryDisabled`, `QueueFull`,
    /// `Duplicate`) surface synchronously; the queue never retries its own
    /// enqueue. On acceptance the note is persisted as `pending` with a
    /// zero retry count and its id is returned.
    pub async fn enqueue(&self, note: NewQueuedNote) -> OutboxResult<NoteId> {
        if note.content.trim().is_empty() {
            return Err(OutboxError::EmptyContent);
        }

        let settings = self.settings.queue_settings();
        if !settings.auto_retry {
            return Err(OutboxError::AutoRetryDisabled);
        }

        let size = self.store.count().await?;
        let capacity = match self.store.capacity_cap() {
            Some(cap) => settings.max_size.min(cap),
            None => settings.max_size,
        };
        if size >= capacity {
            return Err(OutboxError::QueueFull { size, capacity });
        }

        let cutoff = Utc::now() - chrono_duration(DEDUP_WINDOW);
        for existing in self.store.get_all().await? {
            if !existing.status.is_terminal()
                && existing.content == note.content
                && existing.created_at > cutoff
            {
                return Err(OutboxError::Duplicate {
                    existing_id: existing.id,
                });
            }
        }

        let stored = self.store.add(note).await?;
        debug!(id = stored.id, size = size + 1, "Note enqueued");
        Ok(stored.id)
    }

    /// Remove a note outright. Idempotent; returns whether it existed.
    pub async fn dequeue(&self, id: NoteId) -> OutboxResult<bool> {
        let existed = self.store.delete(id).await?;
        if existed {
            debug!(id, "Note dequeued");
        }
        Ok(existed)
    }

    /// Point lookup by id.
    pub async fn get_note(&self, id: NoteId) -> OutboxResult<Option<QueuedNote>> {
        self.store.get(id).await
    }

    /// All notes, optionally filtered to one status, newest first.
    pub async fn get_queue(&self, status: Option<NoteStatus>) -> OutboxResult<Vec<QueuedNote>> {
        match status {
            Some(status) => self.store.get_by_status(status).await,
            None => self.store.get_all().await,
        }
    }

    /// Apply a typed patch to a note. `NotFound` if the id is missing.
    pub async fn update_note(
        &self,
        id: NoteId,
        patch: QueuedNotePatch,
    ) -> OutboxResult<QueuedNote> {
        self.store
            .update(id, patch)
            .await?
            .ok_or(OutboxError::NotFound(id))
    }

    /// Remove delivered notes past retention, plus anything matching the
    /// explicit criteria. Returns the number removed.
    pub async fn cleanup(&self, options: CleanupOptions) -> OutboxResult<usize> {
        let retention = chrono_duration(self.settings.queue_settings().success_retention);
        let now = Utc::now();
        let mut removed = 0;

        for note in self.store.get_all().await? {
            let expired_success =
                note.status == NoteStatus::Success && now - note.updated_at > retention;
            let matches_status = options.status.is_some_and(|s| note.status == s);
            let matches_age = options
                .older_than
                .is_some_and(|age| now - note.created_at > chrono_duration(age));

            if (expired_success || matches_status || matches_age)
                && self.store.delete(note.id).await?
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Cleanup removed notes");
        }
        Ok(removed)
    }

    /// Current queue size.
    pub async fn size(&self) -> OutboxResult<usize> {
        self.store.count().await
    }

    /// Per-status counts, for status reporting.
    pub async fn stats(&self) -> OutboxResult<QueueStats> {
        let mut stats = QueueStats::default();
        for note in self.store.get_all().await? {
            match note.status {
                NoteStatus::Pending => stats.pending += 1,
                NoteStatus::Retrying => stats.retrying += 1,
                NoteStatus::Success => stats.success += 1,
                NoteStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(d.as_millis() as i64)
}
