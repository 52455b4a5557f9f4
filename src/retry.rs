//! Bounded retry with exponential backoff and jitter.
//!
//! Used by the status projector to ride out optimistic-concurrency conflicts:
//! only errors the caller marks as retryable are retried, everything else is
//! returned on the first occurrence. The delay is taken through a [`Sleeper`]
//! so tests can drive the loop without waiting on a real clock.
//!
//! # Example
//!
//! ```ignore
//! use cosi_controller::retry::{retry_with_backoff, RetryConfig, TokioSleeper};
//!
//! let claim = retry_with_backoff(
//!     &RetryConfig::default(),
//!     &TokioSleeper,
//!     "commit_claim_status",
//!     StoreError::is_conflict,
//!     || async { store.update_bucket_claim_status(&claim).await },
//! ).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

/// Source of backoff delays
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry budget for a single optimistic write.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one; values below 1 behave as 1
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Same budget without randomized delays
    pub fn without_jitter(self) -> Self {
        Self {
            jitter: false,
            ..self
        }
    }
}

/// Execute an async operation with exponential backoff.
///
/// The operation runs at most `config.max_attempts` times. An error for which
/// `should_retry` returns false is returned immediately; once the budget is
/// spent the last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    sleeper: &dyn Sleeper,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !should_retry(&err) {
            debug!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Operation failed with non-retryable error"
            );
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Retry budget exhausted"
            );
            return Err(err);
        }

        let wait = if config.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(delay.as_secs_f64() * factor)
        } else {
            delay
        };

        debug!(
            operation = %operation_name,
            attempt = attempt,
            error = %err,
            delay_ms = wait.as_millis(),
            "Operation failed, retrying"
        );

        sleeper.sleep(wait).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}

/// Sleeper that records requested delays and returns immediately
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    /// Delays requested so far
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
