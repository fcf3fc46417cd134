//! Exponential backoff for transient failures.

use std::time::Duration;

use crate::models::config::BatchConfig;

/// Longest server-requested delay that is honoured.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
        )
    }

    /// Whether another attempt may follow attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    ///
    /// The larger of `base * 2^(attempt-1)`, twice the `previous` delay and
    /// the server's `Retry-After`, so delays within one task never shrink
    /// after a server hint.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>, previous: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .max(previous.saturating_mul(2));
        match retry_after {
            Some(server) => computed.max(server.min(MAX_RETRY_AFTER)),
            None => computed,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}
