//! Runtime configuration for the coordinator and gateway.

use std::time::Duration;

use crate::gateway::RetryPolicy;

/// Tunables governing dispatch, retry, evaluation, and deduplication.
///
/// All values have conservative defaults; override with the `with_*`
/// combinators.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use warploom::config::CoordinatorConfig;
///
/// let config = CoordinatorConfig::default()
///     .with_dispatch_timeout(Duration::from_secs(60))
///     .with_max_delivery_attempts(3);
/// assert_eq!(config.max_delivery_attempts, 3);
/// ```
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// How long a DISPATCHED node may await its completion before the
    /// dispatch counts as a delivery failure. Deliberately conservative so
    /// recovery never double-dispatches a command that is merely slow.
    /// Per-node overrides live on the node spec.
    pub dispatch_timeout: Duration,
    /// Total publish attempts (first try included) before delivery counts
    /// as exhausted.
    pub max_delivery_attempts: u32,
    /// First-retry backoff for failed publishes; doubles per attempt.
    pub delivery_backoff_base: Duration,
    /// Upper bound on the publish backoff.
    pub delivery_backoff_cap: Duration,
    /// Attempts per guard expression before evaluation counts as failed.
    pub evaluation_retry_limit: u32,
    /// Pause between guard evaluation retries.
    pub evaluation_backoff: Duration,
    /// Size of the gateway's idempotency-key window; bound it to the
    /// expected number of deliveries in flight.
    pub dedup_capacity: usize,
    /// Prefix of the per-workflow-type dispatch/completion channels.
    pub channel_prefix: String,
}

impl CoordinatorConfig {
    pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;
    pub const DEFAULT_EVALUATION_RETRY_LIMIT: u32 = 3;
    pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;
    pub const DEFAULT_CHANNEL_PREFIX: &'static str = "warploom";

    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_delivery_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.delivery_backoff_base = base;
        self.delivery_backoff_cap = cap;
        self
    }

    #[must_use]
    pub fn with_evaluation_retry_limit(mut self, limit: u32) -> Self {
        self.evaluation_retry_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_evaluation_backoff(mut self, backoff: Duration) -> Self {
        self.evaluation_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    /// The gateway retry policy derived from the delivery settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery_backoff_base,
            self.delivery_backoff_cap,
            self.max_delivery_attempts,
        )
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Self::DEFAULT_DISPATCH_TIMEOUT,
            max_delivery_attempts: Self::DEFAULT_MAX_DELIVERY_ATTEMPTS,
            delivery_backoff_base: Duration::from_millis(100),
            delivery_backoff_cap: Duration::from_secs(5),
            evaluation_retry_limit: Self::DEFAULT_EVALUATION_RETRY_LIMIT,
            evaluation_backoff: Duration::from_millis(50),
            dedup_capacity: Self::DEFAULT_DEDUP_CAPACITY,
            channel_prefix: Self::DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}
