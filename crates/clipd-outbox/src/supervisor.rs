//! Lifecycle drivers: startup recovery, periodic recheck, periodic cleanup
//! and the network-available trigger.
//!
//! All drivers funnel into the same recovery pass, which hands every
//! non-terminal note to the retry processor. The pass is guarded against
//! reentrancy so overlapping triggers cannot run it twice at once.

use crate::queue::CleanupOptions;
use crate::{OutboxQueue, OutboxResult, RetryProcessor};
use clipd_database::NoteStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often lost retry timers are re-derived from persisted state.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How often terminal notes past retention are swept out.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Drives the queue across the process lifecycle.
pub struct OutboxSupervisor {
    queue: Arc<OutboxQueue>,
    processor: Arc<RetryProcessor>,
    recovery_in_progress: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OutboxSupervisor {
    pub fn new(queue: Arc<OutboxQueue>, processor: Arc<RetryProcessor>) -> Self {
        Self {
            queue,
            processor,
            recovery_in_progress: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Run a recovery pass: hand every non-terminal note to the processor.
    ///
    /// Short-circuits if a prior pass is still in flight. Notes with a live
    /// attempt or an outstanding backoff timer are skipped, so a pass can
    /// never double-schedule work.
    pub async fn run_recovery(&self) {
        guarded_recovery(&self.queue, &self.processor, &self.recovery_in_progress).await;
    }

    /// External connectivity signal: run a recovery pass immediately
    /// instead of waiting for the next periodic tick.
    pub async fn network_available(&self) {
        info!("Network available, running recovery pass");
        self.run_recovery().await;
    }

    /// Spawn the periodic drivers. The recheck loop's first tick doubles as
    /// startup recovery; the cleanup loop waits a full interval first.
    pub fn start(&self) {
        let recheck = {
            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let in_progress = self.recovery_in_progress.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(RECHECK_INTERVAL);
                loop {
                    ticker.tick().await;
                    guarded_recovery(&queue, &processor, &in_progress).await;
                }
            })
        };

        let cleanup = {
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
                ticker.tick().await; // immediate first tick
                loop {
                    ticker.tick().await;
                    if let Err(e) = queue.cleanup(CleanupOptions::default()).await {
                        warn!(error = %e, "Periodic cleanup failed");
                    }
                }
            })
        };

        let mut tasks = self.tasks.lock().expect("lock poisoned");
        tasks.push(recheck);
        tasks.push(cleanup);
        info!("Outbox supervisor started");
    }

    /// Stop the periodic drivers. In-flight attempts finish on their own;
    /// their state is persisted either way.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Outbox supervisor stopped");
    }
}

/// Recovery pass with the reentrancy guard applied.
async fn guarded_recovery(
    queue: &Arc<OutboxQueue>,
    processor: &Arc<RetryProcessor>,
    in_progress: &AtomicBool,
) {
    if in_progress.swap(true, Ordering::SeqCst) {
        debug!("Recovery pass already running, skipping");
        return;
    }
    let result = recovery_pass(queue, processor).await;
    in_progress.store(false, Ordering::SeqCst);
    if let Err(e) = result {
        warn!(error = %e, "Recovery pass failed");
    }
}

/// Hand every non-terminal note that is not already busy to the processor.
async fn recovery_pass(
    queue: &Arc<OutboxQueue>,
    processor: &Arc<RetryProcessor>,
) -> OutboxResult<()> {
    let mut notes = queue.get_queue(Some(NoteStatus::Pending)).await?;
    notes.extend(queue.get_queue(Some(NoteStatus::Retrying)).await?);

    if notes.is_empty() {
        return Ok(());
    }

    // Oldest first: delivery order follows creation order
    notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut started = 0;
    for note in notes {
        if processor.is_busy(note.id) {
            continue;
        }
        let processor = Arc::clone(processor);
        let id = note.id;
        tokio::spawn(async move {
            processor.process(id).await;
        });
        started += 1;
    }

    if started > 0 {
        info!(started, "Recovery pass started retries");
    }
    Ok(())
}
