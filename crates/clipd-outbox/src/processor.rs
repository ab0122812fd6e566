//! Retry processor: drives one note one step through its state machine.
//!
//! Each invocation moves a single note from its current state to its next
//! one, persists the transition, and on a retryable failure submits a
//! delayed re-invocation to the scheduler. The processor holds no
//! authoritative state between invocations: a restart loses only the
//! in-memory timers, and recovery re-derives work from persisted statuses.

use crate::scheduler::RetryScheduler;
use crate::{NoteDelivery, OutboxQueue, OutboxResult, SettingsProvider};
use clipd_database::{NoteId, NoteStatus, QueuedNotePatch};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error recorded on a note whose retry budget is exhausted.
pub const MAX_RETRIES_MESSAGE: &str = "max retries reached";

/// Drives queued notes through delivery attempts.
pub struct RetryProcessor {
    queue: Arc<OutboxQueue>,
    delivery: Arc<dyn NoteDelivery>,
    settings: Arc<dyn SettingsProvider>,
    scheduler: RetryScheduler,
    in_flight: Mutex<HashSet<NoteId>>,
}

impl RetryProcessor {
    pub fn new(
        queue: Arc<OutboxQueue>,
        delivery: Arc<dyn NoteDelivery>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            queue,
            delivery,
            settings,
            scheduler: RetryScheduler::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a note currently has a live attempt or an outstanding timer.
    ///
    /// Recovery passes skip busy notes so no id ever has two concurrent
    /// attempts or timers.
    pub fn is_busy(&self, id: NoteId) -> bool {
        self.scheduler.is_reserved(id)
            || self.in_flight.lock().expect("lock poisoned").contains(&id)
    }

    /// Run one attempt for the given note.
    ///
    /// Missing and terminal notes are a no-op, which is what makes stale
    /// scheduled invocations harmless. A storage failure aborts the
    /// invocation without touching delivery ("unknown outcome"); the
    /// periodic recheck picks the note up later.
    pub async fn process(self: Arc<Self>, id: NoteId) {
        if !self.begin(id) {
            debug!(id, "Note already in flight, skipping");
            return;
        }
        let result = self.step(id).await;

        // Reserve the backoff timer before dropping the in-flight marker
        // so no recovery pass can slip in between.
        let reserved = matches!(result, Ok(Some(_))) && self.scheduler.try_reserve(id);
        self.finish(id);

        match result {
            Ok(Some(delay)) if reserved => {
                tokio::spawn(Arc::clone(&self).retry_after(id, delay));
            }
            Ok(Some(_)) => debug!(id, "Retry already scheduled"),
            Ok(None) => {}
            Err(e) => warn!(id, error = %e, "Retry attempt aborted by storage failure"),
        }
    }

    /// Wait out the backoff, release the reservation, then re-invoke.
    ///
    /// Returns a boxed future so the recursive `process` call type-checks as
    /// `Send` for `tokio::spawn`; the behavior is identical to awaiting the
    /// body inline.
    fn retry_after(
        self: Arc<Self>,
        id: NoteId,
        delay: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            self.scheduler.release(id);
            self.process(id).await;
        })
    }

    /// Advance the note one state-machine step.
    ///
    /// Returns the backoff delay when a further attempt must be scheduled.
    async fn step(&self, id: NoteId) -> OutboxResult<Option<Duration>> {
        let Some(note) = self.queue.get_note(id).await? else {
            debug!(id, "Note gone, nothing to retry");
            return Ok(None);
        };
        if note.status.is_terminal() {
            debug!(id, status = note.status.as_str(), "Note already terminal");
            return Ok(None);
        }

        let strategy = self.settings.queue_settings().retry_strategy;
        if !strategy.should_continue(note.retry_count) {
            self.queue
                .update_note(
                    id,
                    QueuedNotePatch {
                        status: Some(NoteStatus::Failed),
                        last_error: Some(MAX_RETRIES_MESSAGE.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            warn!(
                id,
                retry_count = note.retry_count,
                strategy = strategy.as_str(),
                "Note failed permanently"
            );
            return Ok(None);
        }

        self.queue
            .update_note(
                id,
                QueuedNotePatch {
                    status: Some(NoteStatus::Retrying),
                    ..Default::default()
                },
            )
            .await?;

        let outcome = self.delivery.deliver(&note.content, note.kind).await;

        if outcome.success {
            self.queue
                .update_note(
                    id,
                    QueuedNotePatch {
                        status: Some(NoteStatus::Success),
                        clear_last_error: true,
                        ..Default::default()
                    },
                )
                .await?;
            info!(id, retry_count = note.retry_count, "Note delivered");
            return Ok(None);
        }

        let new_count = note.retry_count + 1;
        self.queue
            .update_note(
                id,
                QueuedNotePatch {
                    status: Some(NoteStatus::Pending),
                    retry_count: Some(new_count),
                    last_error: Some(outcome.message.clone()),
                    ..Default::default()
                },
            )
            .await?;
        let delay = strategy.delay_for(new_count as u32);
        warn!(
            id,
            retry_count = new_count,
            delay_ms = delay.as_millis() as u64,
            error = %outcome.message,
            "Delivery failed, scheduling retry"
        );
        Ok(Some(delay))
    }

    fn begin(&self, id: NoteId) -> bool {
        self.in_flight.lock().expect("lock poisoned").insert(id)
    }

    fn finish(&self, id: NoteId) {
        self.in_flight.lock().expect("lock poisoned").remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DurableStore;
    use crate::{DeliveryOutcome, RetryStrategy, StaticSettings};
    use async_trait::async_trait;
    use clipd_database::{Database, NewQueuedNote, NoteKind, QueuedNote};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Delivery fake that plays back a script of outcomes.
    ///
    /// An exhausted script succeeds, unless built with `failing_forever`.
    struct ScriptedDelivery {
        script: Mutex<VecDeque<DeliveryOutcome>>,
        fail_always: bool,
        attempts: AtomicUsize,
    }

    impl ScriptedDelivery {
        fn new(script: Vec<DeliveryOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fail_always: false,
                attempts: AtomicUsize::new(0),
            })
        }

        fn failing_forever() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fail_always: true,
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NoteDelivery for ScriptedDelivery {
        async fn deliver(&self, _content: &str, _kind: NoteKind) -> DeliveryOutcome {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_always {
                return DeliveryOutcome::failed("connection refused");
            }
            self.script
                .lock()
                .expect("lock poisoned")
                .pop_front()
                .unwrap_or_else(DeliveryOutcome::delivered)
        }
    }

    struct Harness {
        queue: Arc<OutboxQueue>,
        processor: Arc<RetryProcessor>,
        settings: Arc<StaticSettings>,
    }

    async fn harness(delivery: Arc<ScriptedDelivery>) -> Harness {
        let db = Database::open_in_memory().await.unwrap();
        let settings = Arc::new(StaticSettings::default());
        let queue = Arc::new(OutboxQueue::new(
            Arc::new(DurableStore::new(db)),
            settings.clone() as Arc<dyn SettingsProvider>,
        ));
        let processor = Arc::new(RetryProcessor::new(
            queue.clone(),
            delivery as Arc<dyn NoteDelivery>,
            settings.clone() as Arc<dyn SettingsProvider>,
        ));
        Harness {
            queue,
            processor,
            settings,
        }
    }

    fn new_note(content: &str) -> NewQueuedNote {
        NewQueuedNote {
            content: content.to_string(),
            metadata: HashMap::new(),
            ..Default::default()
        }
    }

    /// Drive virtual time forward until the note reaches a terminal state.
    async fn wait_for_terminal(queue: &OutboxQueue, id: NoteId) -> QueuedNote {
        for _ in 0..600 {
            let note = queue.get_note(id).await.unwrap().unwrap();
            if note.status.is_terminal() {
                return note;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("note {} never reached a terminal state", id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let delivery = ScriptedDelivery::new(vec![DeliveryOutcome::delivered()]);
        let h = harness(delivery.clone()).await;

        let id = h.queue.enqueue(new_note("x")).await.unwrap();
        h.processor.clone().process(id).await;

        let note = h.queue.get_note(id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Success);
        assert_eq!(note.retry_count, 0);
        assert!(note.last_error.is_none());
        assert_eq!(delivery.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success() {
        let delivery = ScriptedDelivery::new(vec![
            DeliveryOutcome::failed("HTTP 502"),
            DeliveryOutcome::failed("HTTP 503"),
            DeliveryOutcome::delivered(),
        ]);
        let h = harness(delivery.clone()).await;

        let id = h.queue.enqueue(new_note("x")).await.unwrap();
        h.processor.clone().process(id).await;

        let note = wait_for_terminal(&h.queue, id).await;
        assert_eq!(note.status, NoteStatus::Success);
        assert_eq!(note.retry_count, 2);
        assert!(note.last_error.is_none());
        assert_eq!(delivery.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conservative_exhausts_to_failed() {
        let delivery = ScriptedDelivery::failing_forever();
        let h = harness(delivery).await;
        h.settings
            .update(|s| s.retry_strategy = RetryStrategy::Conservative);

        let id = h.queue.enqueue(new_note("b")).await.unwrap();
        h.processor.clone().process(id).await;

        let note = wait_for_terminal(&h.queue, id).await;
        assert_eq!(note.status, NoteStatus::Failed);
        assert_eq!(note.retry_count, 3);
        assert_eq!(note.last_error.as_deref(), Some(MAX_RETRIES_MESSAGE));
    }

    // Real time on purpose: the 2s backoff leaves a wide window to observe
    // the persisted intermediate state before the scheduled retry fires.
    #[tokio::test]
    async fn test_failure_records_error_and_schedules_retry() {
        let delivery = ScriptedDelivery::new(vec![DeliveryOutcome::failed("connection timeout")]);
        let h = harness(delivery).await;

        let id = h.queue.enqueue(new_note("x")).await.unwrap();
        h.processor.clone().process(id).await;

        // Before the backoff elapses the note sits in pending with the error
        let note = h.queue.get_note(id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Pending);
        assert_eq!(note.retry_count, 1);
        assert_eq!(note.last_error.as_deref(), Some("connection timeout"));
        assert!(h.processor.is_busy(id), "backoff timer should be reserved");
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_note_is_not_reprocessed() {
        let delivery = ScriptedDelivery::new(vec![]);
        let h = harness(delivery.clone()).await;

        let id = h.queue.enqueue(new_note("x")).await.unwrap();
        h.queue
            .update_note(
                id,
                QueuedNotePatch {
                    status: Some(NoteStatus::Success),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.processor.clone().process(id).await;
        assert_eq!(delivery.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_note_is_a_noop() {
        let delivery = ScriptedDelivery::new(vec![]);
        let h = harness(delivery.clone()).await;

        h.processor.clone().process(424242).await;
        assert_eq!(delivery.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_cancels_scheduled_retry() {
        let delivery = ScriptedDelivery::failing_forever();
        let h = harness(delivery.clone()).await;

        let id = h.queue.enqueue(new_note("x")).await.unwrap();
        h.processor.clone().process(id).await;
        assert!(delivery.attempts() >= 1);

        // Remove the note while its backoff timer is outstanding
        assert!(h.queue.dequeue(id).await.unwrap());

        // Any timer that was already in flight no-ops against the missing
        // note; after that, attempts stop for good
        tokio::time::sleep(Duration::from_secs(600)).await;
        let settled = delivery.attempts();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(delivery.attempts(), settled);
        assert!(!h.processor.is_busy(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_equals_failed_attempts() {
        let delivery = ScriptedDelivery::new(vec![
            DeliveryOutcome::failed("one"),
            DeliveryOutcome::failed("two"),
            DeliveryOutcome::failed("three"),
            DeliveryOutcome::delivered(),
        ]);
        let h = harness(delivery.clone()).await;

        let id = h.queue.enqueue(new_note("x")).await.unwrap();
        h.processor.clone().process(id).await;

        let note = wait_for_terminal(&h.queue, id).await;
        assert_eq!(note.retry_count, 3);
        assert_eq!(delivery.attempts(), 4);
    }
}
