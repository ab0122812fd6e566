//! Reservation registry for delayed retry re-invocations.
//!
//! Every outstanding backoff timer holds a reservation for its note id, so
//! recovery passes and the network trigger can tell "waiting out a delay"
//! apart from "forgotten" and never double-schedule an id. The registry is
//! deliberately volatile: after a restart, outstanding work is re-derived
//! from persisted non-terminal statuses, not from here.

use clipd_database::NoteId;
use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks which note ids currently have a delayed re-invocation pending.
#[derive(Default)]
pub struct RetryScheduler {
    reserved: Mutex<HashSet<NoteId>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a delayed re-invocation.
    ///
    /// Returns false if the id is already reserved; the caller must not
    /// schedule a second timer.
    pub fn try_reserve(&self, id: NoteId) -> bool {
        self.reserved.lock().expect("lock poisoned").insert(id)
    }

    /// Release a reservation, normally as its timer fires.
    pub fn release(&self, id: NoteId) {
        self.reserved.lock().expect("lock poisoned").remove(&id);
    }

    /// Whether an id currently has a timer outstanding.
    pub fn is_reserved(&self, id: NoteId) -> bool {
        self.reserved.lock().expect("lock poisoned").contains(&id)
    }

    /// Number of outstanding reservations.
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().expect("lock poisoned").len()
    }
}
