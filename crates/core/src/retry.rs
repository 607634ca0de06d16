//! Optimistic retry: re-run an operation whose versioned write lost a race.
//!
//! This is the alternate strategy to named-lock serialization. It does no
//! locking at all; conflicts are detected by the storage layer's version
//! compare-and-swap and the whole operation is retried after a fixed pause.

use std::future::Future;
use std::time::Duration;

use crate::error::CoreError;

/// Attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Bounded retry with a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-contention error, or the
/// attempts run out.
///
/// Only [`CoreError::OptimisticConflict`] and [`CoreError::TooManyRequests`]
/// are retried. Anything else is returned from the attempt that produced
/// it. Exhaustion yields `TooManyRequests`.
pub async fn with_optimistic_retry<F, Fut, T>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_contention() => {
                tracing::debug!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Optimistic attempt lost a race"
                );
                if attempt < max_attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(CoreError::TooManyRequests(format!(
        "Gave up after {max_attempts} conflicting attempts"
    )))
}
