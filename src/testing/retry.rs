//! Bounded exponential backoff for request steps
//!
//! Attempts are numbered from 1. The delay before attempt `k` (k >= 2) is
//! `2^(k-1) * base_delay`, so a unit of work that fails `m` times before
//! succeeding waits `sum(2^i * base_delay) for i in 1..=m` in total.
//! No jitter is added.

use std::future::Future;
use std::time::Duration;

use crate::common::config::RetryConfig;
use crate::common::Result;

use super::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; treated as at least 1
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_attempts(self, attempts: u32) -> Self {
        Self { attempts, ..self }
    }

    /// Delay to wait before `attempt` (zero for the first)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, clock: &dyn Clock, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.delay_before(attempt + 1);
                    tracing::debug!(
                        "Attempt {}/{} failed: {}; retrying in {} ms",
                        attempt,
                        attempts,
                        e,
                        delay.as_millis()
                    );
                    clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_millis(config.base_delay_ms))
    }
}
