//! Bounded exponential backoff, carried as a plain value.
//!
//! The strategy is built once from configuration and threaded to every
//! adapter; adapters decide per error class whether a failure is worth
//! retrying.

use std::future::Future;
use std::time::Duration;

/// Retry policy: bounded attempts with clamped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Factor applied on each successive attempt.
    pub factor: f64,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryStrategy {
    /// Compute the delay for the given zero-based retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let clamped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    /// Run `op`, retrying while `is_transient` classifies the error as
    /// worth another attempt. Logical errors (not-found, duplicate key,
    /// invalid argument) must be classified as non-transient so they
    /// surface immediately.
    pub async fn run<T, E, F, Fut, C>(&self, is_transient: C, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.attempts && is_transient(&err) => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
