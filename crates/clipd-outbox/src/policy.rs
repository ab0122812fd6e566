//! Retry policy: bounded, strategy-driven backoff.
//!
//! Each strategy is a finite list of delays; its length is the maximum
//! number of retries. Past the end of the list the delay saturates at the
//! last entry instead of growing or erroring.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const CONSERVATIVE_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];
const STANDARD_DELAYS_MS: [u64; 6] = [1_000, 2_000, 4_000, 8_000, 16_000, 32_000];
const AGGRESSIVE_DELAYS_MS: [u64; 10] = [
    1_000, 1_000, 2_000, 2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 120_000,
];

/// Named backoff strategy for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Give up quickly: 3 retries over ~7 seconds.
    Conservative,
    /// Default: 6 retries over ~1 minute.
    Standard,
    /// Keep trying: 10 retries over ~4 minutes.
    Aggressive,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Standard
    }
}

impl RetryStrategy {
    fn delays_ms(&self) -> &'static [u64] {
        match self {
            Self::Conservative => &CONSERVATIVE_DELAYS_MS,
            Self::Standard => &STANDARD_DELAYS_MS,
            Self::Aggressive => &AGGRESSIVE_DELAYS_MS,
        }
    }

    /// Maximum number of retries before a note fails permanently.
    pub fn max_retries(&self) -> u32 {
        self.delays_ms().len() as u32
    }

    /// Delay before the next attempt, saturating at the last table entry.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delays = self.delays_ms();
        let index = (attempt as usize).min(delays.len() - 1);
        Duration::from_millis(delays[index])
    }

    /// Whether a note with the given retry count gets another attempt.
    pub fn should_continue(&self, retry_count: i32) -> bool {
        retry_count < self.max_retries() as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Standard => "standard",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "conservative" => Self::Conservative,
            "aggressive" => Self::Aggressive,
            _ => Self::Standard,
        }
    }
}
