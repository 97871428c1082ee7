//! Bounded exponential-backoff retry for remote writes
//!
//! Wraps `create`/`merge`/`append_history` calls. Subscriptions manage their
//! own reconnection and never go through here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Upper bound on the uniform jitter added to each backoff delay.
const JITTER_MAX_MS: u64 = 100;

/// Retry knobs for a single logical operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub base_delay: Duration,
    /// Ceiling on the exponential delay (jitter excluded)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying transient failures with exponential backoff.
    ///
    /// Fatal errors are returned immediately after a single invocation, with
    /// no delay. When every attempt fails with a retryable error the last
    /// error is returned unchanged, so callers still see the original
    /// failure kind.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_fatal() => {
                    debug!(attempt, error = %err, "fatal error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        attempt,
                        error = %err,
                        "retryable error, attempts exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retryable error, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff before the attempt following `attempt`:
    /// `min(base * 2^(attempt-1), max)` plus uniform jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MAX_MS));
        capped + jitter
    }
}
