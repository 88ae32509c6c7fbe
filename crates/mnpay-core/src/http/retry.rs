//! Retry policy for provider calls
//!
//! Backoff is linear: the sleep after attempt `n` is `base_delay × n`. This is
//! what the providers' own client libraries do and what their rate limits are
//! tuned for, so it is deliberately not exponential.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::http::error::ErrorEnvelope;

/// Predicate deciding whether a transport-class failure may be retried
pub type RetryPredicate = Arc<dyn Fn(&ErrorEnvelope) -> bool + Send + Sync>;

/// Retry policy configuration
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of physical sends for one logical call
    pub max_attempts: u32,
    /// Delay unit for linear backoff
    pub base_delay: Duration,
    retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            retryable: Arc::new(ErrorEnvelope::is_transport_class),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom attempt count
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A policy that sends exactly once. Used for operations that must not be
    /// repeated, such as loan disbursement or refunds.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            retryable: Arc::new(|_| false),
            ..Default::default()
        }
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Narrow which transport-class failures are retried
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ErrorEnvelope) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Attempts actually allowed; a zero budget still sends once
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to sleep after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Whether the predicate allows retrying this failure
    pub fn is_retryable(&self, envelope: &ErrorEnvelope) -> bool {
        (self.retryable)(envelope)
    }
}

/// Decision on whether to retry a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay
    Retry { delay: Duration },
    /// Do not retry the request
    NoRetry,
}

impl RetryPolicy {
    /// Decide what to do after `attempt` failed with a transport-class error
    pub fn decide(&self, attempt: u32, envelope: &ErrorEnvelope) -> RetryDecision {
        if attempt >= self.attempt_budget() || !self.is_retryable(envelope) {
            return RetryDecision::NoRetry;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::error::{ErrorClassifier, Outcome, TransportError};
    use proptest::prelude::*;

    fn network_failure() -> ErrorEnvelope {
        let error = TransportError::Connect("refused".into());
        ErrorClassifier::new("khanbank").classify(&Outcome::Transport(&error))
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert!(policy.is_retryable(&network_failure()));
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn test_decide_respects_budget() {
        let policy = RetryPolicy::new(2);
        let failure = network_failure();
        assert_eq!(
            policy.decide(1, &failure),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(policy.decide(2, &failure), RetryDecision::NoRetry);
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.attempt_budget(), 1);
        assert_eq!(policy.decide(1, &network_failure()), RetryDecision::NoRetry);
        assert!(!policy.is_retryable(&network_failure()));
    }

    #[test]
    fn test_zero_attempts_still_sends_once() {
        assert_eq!(RetryPolicy::new(0).attempt_budget(), 1);
    }

    #[test]
    fn test_custom_predicate() {
        let policy = RetryPolicy::default().with_predicate(|e| e.status() == Some(503));
        assert!(!policy.is_retryable(&network_failure()));
    }

    proptest! {
        #[test]
        fn prop_backoff_is_non_decreasing(base_ms in 0u64..5_000, n in 1u32..50) {
            let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(base_ms));
            prop_assert!(policy.delay_for(n) <= policy.delay_for(n + 1));
            prop_assert_eq!(policy.delay_for(n), Duration::from_millis(base_ms) * n);
        }
    }
}
