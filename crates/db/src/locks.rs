//! PostgreSQL-backed [`DistributedLock`].
//!
//! Each successful acquisition pins a dedicated pool connection holding the
//! advisory lock until [`DistributedLock::release`] is called. The business
//! transaction that runs under the lock uses a different connection, so the
//! lock is independent of that transaction's commit or rollback.
//!
//! Every server instance pointed at the same database shares the lock space,
//! which is what makes the lock usable across processes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meetup_core::locking::{DistributedLock, LockError};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::repositories::AdvisoryLockRepo;

/// How long a zero-timeout acquire may wait for a pool connection. The
/// advisory lock itself is still only tried once.
const MIN_SESSION_WAIT: Duration = Duration::from_millis(100);

/// A lock-pool connection that may hold advisory locks.
///
/// Unless marked clean it is closed instead of returned to the pool when
/// dropped, and closing the session makes PostgreSQL drop every advisory
/// lock it held. This covers errors, cancelled futures and
/// [`DistributedLock::release_detached`] alike.
struct LockSession {
    conn: PoolConnection<Postgres>,
    clean: bool,
}

impl LockSession {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self { conn, clean: false }
    }
}

impl Drop for LockSession {
    fn drop(&mut self) {
        if !self.clean {
            self.conn.close_on_drop();
        }
    }
}

/// Named lock over PostgreSQL session-level advisory locks.
///
/// Waiters hold a pool connection while they wait, so this should get its
/// own pool: if it shared the pool of the business transactions, a burst
/// of waiters could starve the lock holder of the connection it needs to
/// finish. Waiting for a connection of that pool counts against the
/// caller's timeout; an exhausted pool reads as a busy lock.
pub struct PgNamedLock {
    pool: PgPool,
    held: Mutex<HashMap<String, LockSession>>,
}

impl PgNamedLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys this process currently holds.
    pub fn held_count(&self) -> usize {
        self.held().len()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, LockSession>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DistributedLock for PgNamedLock {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, LockError> {
        let started = Instant::now();
        let conn =
            match tokio::time::timeout(timeout.max(MIN_SESSION_WAIT), self.pool.acquire()).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(sqlx::Error::PoolTimedOut)) | Err(_) => {
                    tracing::debug!(key, "No lock session free within the wait budget");
                    return Ok(false);
                }
                Ok(Err(e)) => return Err(LockError::backend(key, e)),
            };

        let mut session = LockSession::new(conn);
        let remaining = timeout.saturating_sub(started.elapsed());

        match AdvisoryLockRepo::get_lock(&mut session.conn, key, remaining).await {
            Ok(true) => {
                tracing::trace!(key, "Advisory lock acquired");
                self.held().insert(key.to_string(), session);
                Ok(true)
            }
            Ok(false) => {
                session.clean = true;
                Ok(false)
            }
            // The session state is unknown; dropping it closes the connection.
            Err(e) => Err(e),
        }
    }

    async fn release(&self, key: &str) -> Result<bool, LockError> {
        let session = self.held().remove(key);
        let Some(mut session) = session else {
            return Ok(false);
        };

        // On error the session is closed when dropped, which frees the lock.
        let released = AdvisoryLockRepo::release_lock(&mut session.conn, key).await?;
        session.clean = true;
        tracing::trace!(key, released, "Advisory lock released");
        Ok(released)
    }

    fn release_detached(&self, key: &str) {
        if self.held().remove(key).is_some() {
            tracing::debug!(key, "Advisory lock session closed");
        }
    }
}
