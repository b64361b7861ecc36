//! Bounded retry with a fixed inter-attempt delay
//!
//! Drives the connection liveness probe: a fixed number of attempts with a
//! fixed pause between them. The policy is generic over the operation so
//! tests can drive it with plain closures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy: bounded attempts, fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts; values below 1 behave as 1
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1_000),
        }
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded within the attempt budget
    Success(T),

    /// Every attempt failed
    Exhausted {
        /// Error from the final attempt
        last_error: E,
        /// Attempts actually made
        attempts: u32,
    },
}

impl RetryPolicy {
    /// Create a policy with the default attempt budget and delay
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the fixed delay between attempts
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Execute an operation, retrying on failure until the attempt budget is
    /// spent. The delay is applied between attempts, never after the last.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> RetryResult<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let budget = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=budget {
            debug!(attempt, budget, "attempting operation");

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return RetryResult::Success(result);
                }
                Err(error) => {
                    if attempt < budget {
                        warn!(
                            attempt,
                            delay_ms = self.delay.as_millis() as u64,
                            %error,
                            "operation failed, retrying"
                        );
                        sleep(self.delay).await;
                    } else {
                        warn!(attempt, %error, "operation failed on final attempt");
                    }
                    last_error = Some(error);
                }
            }
        }

        RetryResult::Exhausted {
            // budget >= 1, so at least one attempt ran and stored its error
            last_error: last_error.unwrap(),
            attempts: budget,
        }
    }
}
