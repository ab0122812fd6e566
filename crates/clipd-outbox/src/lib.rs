//! Reliable note delivery for the clipd web clipper.
//!
//! This crate provides:
//! - OutboxQueue: capacity- and dedup-enforcing manager over the note store
//! - RetryProcessor: per-note retry state machine with bounded backoff
//! - OutboxSupervisor: startup recovery, periodic recheck and cleanup
//! - FallbackStore: blob-file persistence when SQLite cannot be opened
//!
//! Delivery itself is a collaborator: embedders implement [`NoteDelivery`]
//! for the actual "create note" call and hand it to [`Outbox::open`].
//!
//! ```ignore
//! let outbox = Outbox::open(&db_path, &fallback_path, delivery, settings).await;
//! outbox.supervisor.start();
//!
//! let id = outbox.queue.enqueue(note).await?;
//! outbox.supervisor.network_available().await;
//! ```

mod delivery;
mod error;
mod fallback;
mod policy;
mod processor;
mod queue;
mod scheduler;
mod settings;
mod store;
mod supervisor;

pub use delivery::{DeliveryOutcome, NoteDelivery};
pub use error::{OutboxError, OutboxResult};
pub use fallback::{FallbackStore, FALLBACK_CAPACITY};
pub use policy::RetryStrategy;
pub use processor::{RetryProcessor, MAX_RETRIES_MESSAGE};
pub use queue::{CleanupOptions, OutboxQueue, DEDUP_WINDOW};
pub use scheduler::RetryScheduler;
pub use settings::{
    QueueSettings, SettingsProvider, StaticSettings, DEFAULT_MAX_SIZE, DEFAULT_SUCCESS_RETENTION,
};
pub use store::{open_store, DurableStore, NoteStore};
pub use supervisor::{OutboxSupervisor, CLEANUP_INTERVAL, RECHECK_INTERVAL};

// Model types come from the database crate; re-exported so embedders only
// need one dependency.
pub use clipd_database::{
    NewQueuedNote, NoteId, NoteKind, NoteStatus, QueueStats, QueuedNote, QueuedNotePatch,
};

use std::path::Path;
use std::sync::Arc;

/// Wired-up outbox: queue, processor and supervisor over one store.
pub struct Outbox {
    pub queue: Arc<OutboxQueue>,
    pub processor: Arc<RetryProcessor>,
    pub supervisor: Arc<OutboxSupervisor>,
}

impl Outbox {
    /// Open the store (falling back to blob storage if SQLite is
    /// unavailable) and wire the queue, processor and supervisor together.
    ///
    /// Call `supervisor.start()` afterwards to begin recovery and the
    /// periodic drivers.
    pub async fn open(
        db_path: &Path,
        fallback_path: &Path,
        delivery: Arc<dyn NoteDelivery>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let store = open_store(db_path, fallback_path).await;
        let queue = Arc::new(OutboxQueue::new(store, settings.clone()));
        let processor = Arc::new(RetryProcessor::new(queue.clone(), delivery, settings));
        let supervisor = Arc::new(OutboxSupervisor::new(queue.clone(), processor.clone()));
        Self {
            queue,
            processor,
            supervisor,
        }
    }
}
