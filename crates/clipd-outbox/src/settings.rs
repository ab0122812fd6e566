//! Queue settings and the provider seam.
//!
//! Drivers and the retry processor re-read settings on every pass, so an
//! operator change takes effect without a restart.

use crate::RetryStrategy;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;

/// Default maximum queue size.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default retention for delivered notes before cleanup removes them.
pub const DEFAULT_SUCCESS_RETENTION: Duration = Duration::from_millis(180_000);

/// Process-wide queue configuration.
///
/// # Fields
///
/// - `max_size`: maximum queued notes (default: 100; the fallback backend
///   additionally caps at 50)
/// - `auto_retry`: gate on enqueueing; when off, failed saves are not
///   queued for retry (default: true)
/// - `retry_strategy`: which backoff table drives retries (default: standard)
/// - `success_retention`: how long delivered notes linger before cleanup
///   (default: 3 minutes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub max_size: usize,
    pub auto_retry: bool,
    pub retry_strategy: RetryStrategy,
    pub success_retention: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            auto_retry: true,
            retry_strategy: RetryStrategy::default(),
            success_retention: DEFAULT_SUCCESS_RETENTION,
        }
    }
}

/// Source of the current [`QueueSettings`].
///
/// Implementations must return the live value on each call; the queue never
/// caches settings across passes.
pub trait SettingsProvider: Send + Sync {
    fn queue_settings(&self) -> QueueSettings;
}

/// In-memory settings provider for embedders and tests.
#[derive(Default)]
pub struct StaticSettings {
    inner: RwLock<QueueSettings>,
}

impl StaticSettings {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Mutate the current settings in place.
    pub fn update(&self, f: impl FnOnce(&mut QueueSettings)) {
        let mut guard = self.inner.write().expect("lock poisoned");
        f(&mut guard);
    }
}

impl SettingsProvider for StaticSettings {
    fn queue_settings(&self) -> QueueSettings {
        self.inner.read().expect("lock poisoned").clone()
    }
}
