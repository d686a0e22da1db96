//! Exponential backoff with jitter for worker restarts.

use std::time::Duration;

use rand::Rng;

use crate::config::schema::RestartConfig;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is 1-based: the first retry waits roughly `base_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(32);
    let capped = base_ms.saturating_mul(1u64 << exponent).min(max_ms);

    // Up to 10% extra so workers that died together do not restart together.
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Restart budget and pacing for one worker.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    base_ms: u64,
    max_ms: u64,
    max_retries: u32,
    reset_after: Duration,
}

impl RestartBackoff {
    pub fn new(config: &RestartConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            max_retries: config.max_retries,
            reset_after: Duration::from_secs(config.reset_after_secs),
        }
    }

    /// Delay before relaunching after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        calculate_backoff(failures, self.base_ms, self.max_ms)
    }

    /// True once `failures` consecutive failures exceed the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures > self.max_retries
    }

    /// A run this long wipes the failure streak.
    pub fn resets_streak(&self, uptime: Duration) -> bool {
        uptime >= self.reset_after
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
