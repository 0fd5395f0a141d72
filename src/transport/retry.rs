//! Deadline + retry + jittered backoff around agent calls.
//!
//! Probing, negotiation and execution all go through [`RetryPolicy::run`].
//! The closure performs one attempt *and* validates the response, so a
//! malformed answer is retried exactly like a dropped connection.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CallError;

/// Randomized pause between attempts, drawn uniformly from
/// `[min_ms, max_ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(default = "default_backoff_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

fn default_backoff_min_ms() -> u64 { 100 }
fn default_backoff_max_ms() -> u64 { 300 }

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min_ms: default_backoff_min_ms(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

impl Backoff {
    /// No pause at all.
    pub const fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn delay(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        if lo == hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Outcome of a retried call.
#[derive(Debug)]
pub struct Attempted<T> {
    /// First success, or the error of the last attempt.
    pub result: Result<T, CallError>,
    /// Attempts actually made (at least 1).
    pub attempts: u32,
    /// Wall time across all attempts and pauses.
    pub elapsed: Duration,
}

/// Attempt budget, per-call deadline and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `retry_attempts + 1`.
    pub retry_attempts: u32,
    /// Deadline for each individual attempt.
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retry_attempts: u32, timeout: Duration) -> Self {
        Self {
            retry_attempts,
            timeout,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Run `call` until it succeeds, the budget is spent, or `cancel` fires.
    ///
    /// `call` receives the 1-based attempt number. Each attempt is dropped
    /// when it exceeds [`timeout`](Self::timeout); cancellation drops the
    /// in-flight attempt (or the pending backoff) and stops immediately.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut call: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts();
        let timeout_ms = self.timeout.as_millis() as u64;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CallError::Cancelled),
                res = tokio::time::timeout(self.timeout, call(attempt)) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(CallError::Timeout { timeout_ms }),
                },
            };

            let err = match outcome {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    }
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }

            log::debug!("attempt {}/{} failed: {}", attempt, max_attempts, err);

            let pause = self.backoff.delay();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(CallError::Cancelled),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
