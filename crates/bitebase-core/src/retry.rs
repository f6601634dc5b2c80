//! Retry policy with exponential backoff.
//!
//! Used by the MCP manager's reconnect loop: `base * 2^(attempt-1)` capped
//! at `max_delay_ms`, with ±25% jitter to avoid synchronized reconnect
//! storms across servers.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff parameters for a bounded retry loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second attempt (the first runs immediately).
    pub base_delay_ms: u64,
    /// Cap applied after exponential growth.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Deterministic backoff for a 1-based attempt number, before jitter.
    ///
    /// Attempt 1 maps to the base delay; growth is capped at `max_delay_ms`.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(63);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Backoff for a 1-based attempt number with ±25% jitter applied.
    ///
    /// Never returns zero: jitter keeps at least 1 ms.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let jitter_range = base.as_millis() as u64 / 4;
        if jitter_range == 0 {
            return base.max(Duration::from_millis(1));
        }
        let offset = rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
        let ms = (base.as_millis() as i64 + offset).max(1);
        Duration::from_millis(ms as u64)
    }
}
