//! ---
//! wq_section: "03-networking"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Connection management for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Bounded retry loop with a fixed pause between attempts.
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least one.
    pub max_attempts: usize,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Build a policy; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds or the attempts are used up. The
    /// closure receives the 1-indexed attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<Retried<T>, Exhausted<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            info!(label, attempt, max_attempts = self.max_attempts, "attempting");
            match operation(attempt).await {
                Ok(value) => {
                    info!(label, attempt, "attempt succeeded");
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(label, attempt, error = %err, delay_ms = self.delay.as_millis() as u64, "attempt failed; retrying");
                    sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(label, attempts = attempt, error = %err, "attempts exhausted");
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Successful result together with the attempt that produced it.
#[derive(Debug)]
pub struct Retried<T> {
    /// Value returned by the successful attempt.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: usize,
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts made.
    pub attempts: usize,
    /// Error from the final attempt.
    pub last_error: E,
}
