//! Bounded fixed-interval retries.
//!
//! Every wait in the pipeline (reachability check, pod readiness, push) goes
//! through [`retry_fixed`] with its own [`RetryBudget`].
//!
//! # Example
//!
//! ```ignore
//! use pivot::retry::{retry_fixed, RetryBudget};
//!
//! let budget = RetryBudget::new(60, Duration::from_secs(3));
//! retry_fixed(&budget, "push", || async { store.push("local", user, pass) }).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Attempt budget for a single waiting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between two attempts.
    pub interval: Duration,
}

impl RetryBudget {
    /// Create a budget.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Budget used for the Git server health check.
    #[must_use]
    pub const fn reachability() -> Self {
        Self::new(60, Duration::from_secs(3))
    }

    /// Budget used for pushes.
    #[must_use]
    pub const fn push() -> Self {
        Self::new(60, Duration::from_secs(3))
    }

    /// Budget used while waiting for a pod to run.
    #[must_use]
    pub const fn pod_ready() -> Self {
        Self::new(60, Duration::from_secs(5))
    }
}

/// Returned when a budget is spent without success.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

/// Run `operation` until it succeeds or the budget is spent.
///
/// Sleeps `budget.interval` between attempts, never after the last one. A
/// budget of zero attempts still runs the operation once.
pub async fn retry_fixed<F, Fut, T, E>(
    budget: &RetryBudget,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = budget.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                debug!(operation = %operation_name, attempt, "Operation succeeded");
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed, budget exhausted"
                );
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(budget.interval).await;
            }
        }
    }
}
