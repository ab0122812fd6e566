//! Fallback store: a whole-blob JSON file.
//!
//! Used when the durable database cannot be opened. The entire queue is one
//! serialized list in a single file slot, so capacity is hard-capped well
//! below the configurable queue size, and ids are generated client-side
//! since there is no auto-increment to lean on.

use crate::store::NoteStore;
use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use chrono::Utc;
use clipd_database::{NewQueuedNote, NoteId, NoteStatus, QueuedNote, QueuedNotePatch};
use rand::Rng;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Hard capacity cap of the fallback backend, regardless of `max_size`.
pub const FALLBACK_CAPACITY: usize = 50;

/// Blob-file note store.
///
/// The in-memory list is authoritative for the process; every mutation
/// rewrites the blob through a temp-file-and-rename so a crash mid-write
/// never corrupts it.
pub struct FallbackStore {
    path: PathBuf,
    items: Mutex<Vec<QueuedNote>>,
}

impl FallbackStore {
    /// Open the fallback store, loading any existing blob.
    ///
    /// A missing or unreadable blob reads as an empty queue: the fallback
    /// path must always come up.
    pub async fn open(path: PathBuf) -> Self {
        let items = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<QueuedNote>>(&bytes) {
                Ok(items) => {
                    debug!(path = %path.display(), count = items.len(), "Loaded fallback blob");
                    items
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Fallback blob unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            path,
            items: Mutex::new(items),
        }
    }

    async fn persist(&self, items: &[QueuedNote]) -> OutboxResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(items)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Generate a client-side id: millisecond timestamp plus a random
    /// component, re-drawn on the off chance of a collision.
    fn generate_id(items: &[QueuedNote]) -> NoteId {
        let mut rng = rand::thread_rng();
        loop {
            let id = Utc::now().timestamp_millis() * 1_000 + rng.gen_range(0..1_000);
            if !items.iter().any(|n| n.id == id) {
                return id;
            }
        }
    }
}

#[async_trait]
impl NoteStore for FallbackStore {
    async fn add(&self, note: NewQueuedNote) -> OutboxResult<QueuedNote> {
        let mut items = self.items.lock().await;
        if items.len() >= FALLBACK_CAPACITY {
            return Err(OutboxError::QueueFull {
                size: items.len(),
                capacity: FALLBACK_CAPACITY,
            });
        }

        let now = Utc::now();
        let stored = QueuedNote {
            id: Self::generate_id(&items),
            content: note.content,
            kind: note.kind,
            url: note.url,
            title: note.title,
            status: NoteStatus::Pending,
            retry_count: 0,
            last_error: None,
            metadata: note.metadata,
            created_at: now,
            updated_at: now,
        };
        items.push(stored.clone());
        self.persist(&items).await?;
        Ok(stored)
    }

    async fn get(&self, id: NoteId) -> OutboxResult<Option<QueuedNote>> {
        let items = self.items.lock().await;
        Ok(items.iter().find(|n| n.id == id).cloned())
    }

    async fn get_all(&self) -> OutboxResult<Vec<QueuedNote>> {
        let items = self.items.lock().await;
        let mut all = items.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn get_by_status(&self, status: NoteStatus) -> OutboxResult<Vec<QueuedNote>> {
        let mut matching = self.get_all().await?;
        matching.retain(|n| n.status == status);
        Ok(matching)
    }

    async fn put(&self, note: QueuedNote) -> OutboxResult<bool> {
        let mut items = self.items.lock().await;
        let Some(slot) = items.iter_mut().find(|n| n.id == note.id) else {
            return Ok(false);
        };
        *slot = note;
        self.persist(&items).await?;
        Ok(true)
    }

    async fn update(&self, id: NoteId, patch: QueuedNotePatch) -> OutboxResult<Option<QueuedNote>> {
        let mut items = self.items.lock().await;
        let Some(slot) = items.iter_mut().find(|n| n.id == id) else {
            return Ok(None);
        };
        slot.apply_patch(&patch);
        let updated = slot.clone();
        self.persist(&items).await?;
        Ok(Some(updated))
    }

    async fn delete(&self, id: NoteId) -> OutboxResult<bool> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|n| n.id != id);
        let existed = items.len() < before;
        if existed {
            self.persist(&items).await?;
        }
        Ok(existed)
    }

    async fn count(&self) -> OutboxResult<usize> {
        Ok(self.items.lock().await.len())
    }

    fn capacity_cap(&self) -> Option<usize> {
        Some(FALLBACK_CAPACITY)
    }
}
