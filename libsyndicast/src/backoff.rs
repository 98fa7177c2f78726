//! Retry backoff policy
//!
//! One policy object owns every retry parameter; both the scheduler's
//! re-enqueue path and the webhook sender consult a `BackoffPolicy` rather
//! than carrying their own constants.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum number of failed attempts before the outcome is terminal.
    pub cap: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: u32) -> Self {
        Self { base, cap }
    }

    /// Publish retry policy: 60s base, doubling, 3 attempts.
    pub fn publish_default() -> Self {
        Self::new(Duration::from_secs(60), 3)
    }

    /// Webhook delivery policy: 1s base, doubling, 3 attempts.
    pub fn webhook_default() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }

    /// Delay before the retry following `attempt` failed attempts:
    /// `base * 2^(attempt - 1)`. `attempt` is 1-based; attempt 1 is the
    /// first failure.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base * 2u32.saturating_pow(exponent)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_delays_are_exponential() {
        let policy = BackoffPolicy::publish_default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(2), Duration::from_secs(120));
        assert_eq!(policy.delay_after(3), Duration::from_secs(240));
    }

    #[test]
    fn test_webhook_delays() {
        let policy = BackoffPolicy::webhook_default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_cap() {
        let policy = BackoffPolicy::publish_default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 100);
        // Saturates rather than panicking
        let _ = policy.delay_after(90);
    }
}
