//! Exponential backoff policy for publish retries.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule for at-least-once publishing.
///
/// Attempt `n` (1-based) sleeps `base * 2^(n-1)`, capped at `cap`, plus up
/// to 50% random jitter so a burst of failing publishes does not retry in
/// lockstep.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Total attempts (first try included) before delivery counts as
    /// exhausted.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base
            .saturating_mul(1u32 << exp)
            .min(self.cap);
        let jitter_cap = (backoff.as_millis() as u64 / 2).max(1);
        let jitter = rand::rng().random_range(0..jitter_cap);
        backoff + Duration::from_millis(jitter)
    }
}
