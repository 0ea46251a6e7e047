//! Retry policy with capped exponential backoff.
//!
//! The policy only decides how often and how long to wait. It knows nothing about
//! HTTP or streaming; the client hands it a closure per attempt.

use crate::core::config::RecognitionConfig;
use crate::{Result, TilescribeError};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Delay before retry number `retry` (0 for the first retry): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full backoff schedule, one entry per retry.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1)).map(|r| self.delay_for(r)).collect()
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number. `on_backoff` is called with the
    /// failed attempt number, its error and the delay before each retry. On success the
    /// value is returned with the number of attempts used; otherwise the last error is
    /// returned together with that count.
    pub async fn run<T, F, Fut, B>(
        &self,
        mut operation: F,
        mut on_backoff: B,
    ) -> std::result::Result<(T, u32), (TilescribeError, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        B: FnMut(u32, &TilescribeError, Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt >= max_attempts => return Err((e, attempt)),
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    on_backoff(attempt, &e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
