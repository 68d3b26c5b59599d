//! Exponential backoff with jitter for transient transport failures.

use crate::config::EngineConfig;
use rand::Rng;
use std::time::Duration;

/// Retry limits and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
            jitter_ms: config.retry_jitter_ms,
        }
    }

    /// Delay before retry number `retry` (0-based), with random jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.delay_with_jitter(retry, jitter)
    }

    /// `min(base * 2^retry + jitter, cap)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use source_refresh::executor::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy { max_attempts: 3, base_delay_ms: 1000, max_delay_ms: 10_000, jitter_ms: 250 };
    /// assert_eq!(policy.delay_with_jitter(0, 100), Duration::from_millis(1100));
    /// assert_eq!(policy.delay_with_jitter(2, 0), Duration::from_millis(4000));
    /// assert_eq!(policy.delay_with_jitter(5, 0), Duration::from_millis(10_000));
    /// ```
    pub fn delay_with_jitter(&self, retry: u32, jitter_ms: u64) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self
            .base_delay_ms
            .saturating_mul(factor)
            .saturating_add(jitter_ms)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
