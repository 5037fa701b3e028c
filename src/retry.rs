//! Retry With Exponential Backoff
//!
//! The store layer never retries on its own. Callers that want another
//! attempt after a failed read or write wrap the operation here, with a
//! policy and a predicate deciding which errors are worth retrying.
//!
//! ```text
//! attempt 0: immediate
//! attempt 1: wait initial_backoff
//! attempt n: wait min(initial_backoff * multiplier^(n-1), max_backoff)
//! ```

use crate::error::StoreError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy configuration for exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        RetryPolicy {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0-indexed), capped at `max_backoff`
    pub fn backoff(&self, retry: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(backoff_ms as u64).min(self.max_backoff)
    }
}

/// Default predicate: only transport failures are worth another attempt
pub fn is_transient(err: &StoreError) -> bool {
    err.is_transient()
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are exhausted. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    debug!(error = %err, "non-retryable error, giving up");
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retryable error, backing off"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
