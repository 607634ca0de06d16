//! Translation of sqlx errors into domain errors.
//!
//! Repositories used directly by handlers return `sqlx::Error` and let the
//! API classify it. The seat store and lock code must speak
//! [`CoreError`], so they go through [`to_core`].

use meetup_core::error::CoreError;

/// PostgreSQL `lock_not_available`: a `lock_timeout` expired.
pub const LOCK_NOT_AVAILABLE: &str = "55P03";

/// PostgreSQL `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL `deadlock_detected`.
pub const DEADLOCK_DETECTED: &str = "40P01";

/// PostgreSQL `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE of a database error, if the error came from the server.
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Name of the violated constraint, if any.
pub fn constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

/// Returns `true` if `err` is a lock wait that ran out of `lock_timeout`.
pub fn is_lock_timeout(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some(LOCK_NOT_AVAILABLE)
}

/// Map a sqlx error to a [`CoreError`].
///
/// - lock timeouts and deadlocks become `TooManyRequests` (retryable),
/// - serialization failures become `OptimisticConflict`,
/// - everything else is an `Internal` error and is logged.
pub fn to_core(err: sqlx::Error, entity: &'static str, id: i64) -> CoreError {
    match sqlstate(&err).as_deref() {
        Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED) => CoreError::TooManyRequests(format!(
            "Timed out waiting for the lock on {entity} {id}"
        )),
        Some(SERIALIZATION_FAILURE) => CoreError::OptimisticConflict { entity, id },
        _ => {
            tracing::error!(error = %err, entity, id, "Database error");
            CoreError::Internal(format!("Database error: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_non_database_errors_are_internal() {
        assert_matches!(
            to_core(sqlx::Error::PoolTimedOut, "Meeting", 1),
            CoreError::Internal(_)
        );
        assert!(!is_lock_timeout(&sqlx::Error::RowNotFound));
        assert_eq!(constraint(&sqlx::Error::RowNotFound), None);
    }
}
