//! Connection-scoped PostgreSQL advisory locks keyed by string.
//!
//! A session-level advisory lock belongs to the connection that took it,
//! independently of any transaction on that connection: it survives commits
//! and rollbacks and is released by `pg_advisory_unlock` or by closing the
//! session. Callers therefore pass an explicit connection and must release
//! on that same connection.
//!
//! String keys are hashed to the 64-bit lock space with
//! `hashtextextended(key, 0)`.

use std::time::Duration;

use meetup_core::locking::LockError;
use sqlx::PgConnection;

use crate::error::is_lock_timeout;

/// Provides acquire/release of named advisory locks on a given connection.
pub struct AdvisoryLockRepo;

impl AdvisoryLockRepo {
    /// Take the lock `key` on `conn`, waiting at most `timeout`.
    ///
    /// A zero timeout uses `pg_try_advisory_lock` and never waits. Otherwise
    /// the session's `lock_timeout` bounds `pg_advisory_lock`, and is reset
    /// before returning so the connection goes back to the pool clean.
    /// Returns `false` when the wait budget ran out.
    pub async fn get_lock(
        conn: &mut PgConnection,
        key: &str,
        timeout: Duration,
    ) -> Result<bool, LockError> {
        if timeout.is_zero() {
            return sqlx::query_scalar::<_, bool>(
                "SELECT pg_try_advisory_lock(hashtextextended($1, 0))",
            )
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| LockError::backend(key, e));
        }

        sqlx::query("SELECT set_config('lock_timeout', $1, false)")
            .bind(format!("{}ms", timeout.as_millis().max(1)))
            .execute(&mut *conn)
            .await
            .map_err(|e| LockError::backend(key, e))?;

        let acquired = match sqlx::query("SELECT pg_advisory_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *conn)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_lock_timeout(&e) => Ok(false),
            Err(e) => Err(LockError::backend(key, e)),
        };

        let reset = sqlx::query("SELECT set_config('lock_timeout', '0', false)")
            .execute(&mut *conn)
            .await
            .map_err(|e| LockError::backend(key, e));

        match (acquired, reset) {
            (Ok(acquired), Ok(_)) => Ok(acquired),
            (Err(e), _) => Err(e),
            (Ok(true), Err(e)) => {
                // Never leave a lock behind on a connection the caller will
                // treat as failed.
                let _ = Self::release_lock(conn, key).await;
                Err(e)
            }
            (Ok(false), Err(e)) => Err(e),
        }
    }

    /// Release the lock `key` held by `conn`.
    ///
    /// Returns `false` if `conn` did not hold it (PostgreSQL also emits a
    /// warning in that case, which is harmless).
    pub async fn release_lock(conn: &mut PgConnection, key: &str) -> Result<bool, LockError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| LockError::backend(key, e))
    }

    /// Whether any session currently holds `key`. Diagnostic only: the
    /// answer may be stale by the time it is read.
    pub async fn is_locked(conn: &mut PgConnection, key: &str) -> Result<bool, LockError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS ( \
                 SELECT 1 FROM pg_locks \
                 WHERE locktype = 'advisory' AND granted AND objsubid = 1 \
                   AND ((classid::bigint << 32) | objid::bigint) = hashtextextended($1, 0) \
             )",
        )
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| LockError::backend(key, e))
    }
}
