//! Named locks: the `DistributedLock` capability and the
//! [`with_named_lock`] combinator that wraps an operation in
//! acquire / run / release.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;

/// Failure of the lock service itself (not contention).
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock backend error on '{key}': {source}")]
    Backend {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LockError {
    pub fn backend(
        key: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        LockError::Backend {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// A process-external, string-keyed mutex with bounded wait.
///
/// Implementations must be shared infrastructure (every server instance
/// sees the same holders), so an in-process mutex is only acceptable for
/// tests and single-node development.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take `key`, waiting at most `timeout`. Returns `false` when
    /// the wait budget ran out. A zero timeout never waits.
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, LockError>;

    /// Release `key` if this handle holds it. Returns `false` (not an
    /// error) when nothing was held.
    ///
    /// Must only be paired with a successful [`acquire`](Self::acquire) of
    /// the same key; [`with_named_lock`] guarantees that.
    async fn release(&self, key: &str) -> Result<bool, LockError>;

    /// Give up `key` from a synchronous context without waiting for the
    /// backend, e.g. when the holder is dropped mid-operation. Must not
    /// block; a backend that needs I/O hands the work to the runtime.
    fn release_detached(&self, key: &str);
}

#[async_trait]
impl<T: DistributedLock + ?Sized> DistributedLock for Arc<T> {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, LockError> {
        (**self).acquire(key, timeout).await
    }

    async fn release(&self, key: &str) -> Result<bool, LockError> {
        (**self).release(key).await
    }

    fn release_detached(&self, key: &str) {
        (**self).release_detached(key)
    }
}

/// Releases the lock if the critical section is abandoned: the future
/// running it was dropped, or the body panicked.
struct HeldLock<'a, L: DistributedLock + ?Sized> {
    lock: &'a L,
    key: &'a str,
    armed: bool,
}

impl<L: DistributedLock + ?Sized> Drop for HeldLock<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(key = self.key, "Named lock holder abandoned, releasing");
            self.lock.release_detached(self.key);
        }
    }
}

/// Run `body` while holding the named lock `key`.
///
/// - If the lock is not obtained within `timeout`, `body` never runs and
///   the result is [`CoreError::TooManyRequests`].
/// - Once acquired, the lock is released after `body` finishes, whatever
///   it returned. A failed release is logged and does not replace the
///   body's result; the backend is expected to drop the session holding it.
/// - If the returned future is dropped while holding the lock, or `body`
///   panics, the lock is handed to [`DistributedLock::release_detached`].
pub async fn with_named_lock<L, F, Fut, T>(
    lock: &L,
    key: &str,
    timeout: Duration,
    body: F,
) -> Result<T, CoreError>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    if !lock.acquire(key, timeout).await? {
        tracing::debug!(key, timeout_ms = timeout.as_millis() as u64, "Named lock busy");
        return Err(CoreError::TooManyRequests(format!(
            "Resource '{key}' is busy, try again shortly"
        )));
    }

    let mut held = HeldLock {
        lock,
        key,
        armed: true,
    };
    let result = body().await;

    match lock.release(key).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(key, "Named lock was not held at release"),
        Err(e) => tracing::error!(key, error = %e, "Failed to release named lock"),
    }
    held.armed = false;

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::MemoryNamedLock;

    /// Lock whose release always fails, counting calls.
    struct BrokenRelease {
        inner: MemoryNamedLock,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl DistributedLock for BrokenRelease {
        async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, LockError> {
            self.inner.acquire(key, timeout).await
        }

        async fn release(&self, key: &str) -> Result<bool, LockError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.inner.release(key).await?;
            Err(LockError::backend(key, "connection reset"))
        }

        fn release_detached(&self, key: &str) {
            self.inner.release_detached(key)
        }
    }

    #[tokio::test]
    async fn test_releases_after_success() {
        let lock = MemoryNamedLock::new();
        let out = with_named_lock(&lock, "group1", Duration::from_secs(3), || async {
            Ok::<_, CoreError>(5)
        })
        .await
        .unwrap();

        assert_eq!(out, 5);
        assert!(!lock.is_held("group1"));
    }

    #[tokio::test]
    async fn test_releases_after_business_error() {
        let lock = MemoryNamedLock::new();
        let result: Result<(), _> =
            with_named_lock(&lock, "group1", Duration::from_secs(3), || async {
                Err(CoreError::GroupFull {
                    group_id: 1,
                    capacity: 2,
                })
            })
            .await;

        assert_matches!(result, Err(CoreError::GroupFull { .. }));
        assert!(!lock.is_held("group1"));
    }

    #[tokio::test]
    async fn test_busy_lock_fails_fast_without_running_body() {
        let lock = MemoryNamedLock::new();
        assert!(lock.acquire("group1", Duration::ZERO).await.unwrap());

        let ran = AtomicUsize::new(0);
        let result = with_named_lock(&lock, "group1", Duration::from_millis(20), || async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CoreError>(())
        })
        .await;

        assert_matches!(result, Err(CoreError::TooManyRequests(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        // The original holder is untouched.
        assert!(lock.is_held("group1"));
    }

    #[tokio::test]
    async fn test_release_failure_does_not_mask_result() {
        let lock = BrokenRelease {
            inner: MemoryNamedLock::new(),
            releases: AtomicUsize::new(0),
        };
        let out = with_named_lock(&lock, "meeting3", Duration::from_secs(1), || async {
            Ok::<_, CoreError>("seated")
        })
        .await
        .unwrap();

        assert_eq!(out, "seated");
        assert_eq!(lock.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_leave_no_stuck_lock() {
        let lock = MemoryNamedLock::new();
        for _ in 0..10 {
            let _ = with_named_lock(&lock, "meeting8", Duration::from_millis(10), || async {
                Err::<(), _>(CoreError::Internal("boom".into()))
            })
            .await;
        }
        assert!(lock.acquire("meeting8", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_holder_releases_lock() {
        let lock = MemoryNamedLock::new();
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            with_named_lock(&lock, "meeting7", Duration::from_secs(3), || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, CoreError>(())
            }),
        )
        .await;

        assert!(cancelled.is_err());
        assert!(!lock.is_held("meeting7"));
        assert!(lock.acquire("meeting7", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_panicking_body_releases_lock() {
        let lock = Arc::new(MemoryNamedLock::new());

        let task = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                with_named_lock(&*lock, "group9", Duration::from_secs(3), || async {
                    let failed = true;
                    if failed {
                        panic!("body failed");
                    }
                    Ok::<_, CoreError>(())
                })
                .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!lock.is_held("group9"));
        assert!(lock.acquire("group9", Duration::ZERO).await.unwrap());
    }
}
