//! Retry backoff policy

/// Exponential backoff with a hard ceiling, no jitter
///
/// Delay for failure number `n` (zero-based) is `base * 2^n`, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: i64,
    pub cap_ms: i64,
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many attempts already failed
    #[must_use]
    pub fn delay_ms(&self, prior_attempts: u32) -> i64 {
        let doubled = self
            .base_ms
            .saturating_mul(1_i64 << prior_attempts.min(31));
        doubled.min(self.cap_ms)
    }

    /// Absolute retry time for the next attempt
    #[must_use]
    pub fn next_retry_at(&self, now_ms: i64, prior_attempts: u32) -> i64 {
        now_ms.saturating_add(self.delay_ms(prior_attempts))
    }
}

impl Default for BackoffPolicy {
    /// 1 second doubling up to a 5 minute ceiling
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 300_000,
        }
    }
}
