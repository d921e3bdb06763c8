//! Delays between transport retries.

use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff with equal jitter.
///
/// Attempt `n` sleeps for a random duration in `[ceiling / 2, ceiling]`, where
/// `ceiling = min(base * 2^n, max)`. A server-provided `Retry-After` replaces the
/// computed delay but is still bounded by `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Upper bound of the delay before retry `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }

    /// Delay before retry `attempt`, honouring a `Retry-After` hint when present.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max);
        }
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(ceiling / 2..=ceiling))
    }
}
