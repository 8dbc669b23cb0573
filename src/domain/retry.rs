//! Resilience policy for external collaborator calls.
//!
//! One policy object governs every provider call site: a fixed attempt cap,
//! an exponential backoff schedule, and the retryable-vs-fatal split defined
//! by [`ScoreError::is_retryable`]. Each attempt is bounded by
//! `call_timeout`; an overrun counts as [`ScoreError::Timeout`].

use crate::domain::error::ScoreError;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for a single attempt. Zero disables it.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt` (1-based retries): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt cap is reached. A provider-supplied retry-after wins over the
    /// schedule when it is longer.
    pub fn run<T, F>(&self, label: &str, op: F) -> Result<T, ScoreError>
    where
        F: Fn() -> Result<T, ScoreError> + Sync,
        T: Send,
    {
        self.run_with_sleep(label, &mut || self.call_with_deadline(&op), thread::sleep)
    }

    /// One attempt on a scoped worker. Calls cannot be interrupted, so a late
    /// worker is joined before returning, but its result is discarded and the
    /// attempt reports [`ScoreError::Timeout`].
    fn call_with_deadline<T, F>(&self, op: &F) -> Result<T, ScoreError>
    where
        F: Fn() -> Result<T, ScoreError> + Sync,
        T: Send,
    {
        if self.call_timeout.is_zero() {
            return op();
        }
        let timeout = self.call_timeout;
        thread::scope(|s| {
            let (tx, rx) = mpsc::channel();
            s.spawn(move || {
                let _ = tx.send(op());
            });
            match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(ScoreError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(ScoreError::Provider("provider call aborted".into()))
                }
            }
        })
    }

    fn run_with_sleep<T, F, S>(&self, label: &str, op: &mut F, sleep: S) -> Result<T, ScoreError>
    where
        F: FnMut() -> Result<T, ScoreError>,
        S: Fn(Duration),
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                sleep(self.backoff(attempt));
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                    warn!(call = label, attempt, error = %err, "retrying provider call");
                    if let ScoreError::RateLimited {
                        retry_after: Some(after),
                    } = &err
                    {
                        let scheduled = self.backoff(attempt);
                        if *after > scheduled {
                            sleep(after.saturating_sub(scheduled).min(self.max_delay));
                        }
                    }
                }
                Err(err) => {
                    debug!(call = label, attempts = attempt + 1, error = %err, "provider call failed");
                    return Err(err);
                }
            }
        }
    }
}
