//! Fixed-count retry of a call attempt.
//!
//! The attempt itself carries its own wait bound (the response timeout), so
//! there is no delay between attempts: a lost attempt is retransmitted
//! immediately until the attempt budget runs out.

use std::future::Future;
use tracing::{debug, warn};

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if any attempt failed.
    pub last_error: Option<String>,
}

/// Run `operation` up to `max_attempts` times.
///
/// Stops at the first success, or at the first error that `should_retry`
/// rejects. The error of the final attempt is returned when the budget is
/// exhausted.
pub async fn retry_async<F, Fut, T, E>(
    max_attempts: u32,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        attempt += 1;
        stats.attempts = attempt;

        match operation(attempt).await {
            Ok(value) => {
                stats.success = true;
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                if !should_retry(&e) {
                    debug!("Error is not retryable: {}", e);
                    return (Err(e), stats);
                }

                if attempt >= max_attempts {
                    warn!(
                        "All {} attempts exhausted. Last error: {}",
                        max_attempts, e
                    );
                    return (Err(e), stats);
                }

                warn!("Attempt {}/{} failed: {}. Retrying", attempt, max_attempts, e);
            }
        }
    }
}
