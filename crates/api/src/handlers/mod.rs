pub mod group;
pub mod meeting;

use std::future::Future;

use meetup_core::error::CoreError;

use crate::error::{AppError, AppResult};

/// Run a lock-taking operation on its own task.
///
/// Axum drops a handler's future when the client disconnects. An operation
/// that holds a named lock or a row lock must instead run to completion so
/// the lock is released on the normal path, so such operations are spawned
/// and the handler only awaits their outcome.
pub(crate) async fn detached<F, T>(operation: F) -> AppResult<T>
where
    F: Future<Output = Result<T, CoreError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| AppError::InternalError(format!("Reservation task failed: {e}")))?
        .map_err(AppError::from)
}
