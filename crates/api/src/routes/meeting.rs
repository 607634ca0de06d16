//! Route definitions for the `/meetings` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::meeting;
use crate::state::AppState;

/// Routes mounted at `/meetings`.
///
/// ```text
/// GET    /{id}                              -> get_by_id
/// DELETE /{id}                              -> cancel
///
/// GET    /{id}/participants                 -> list_participants
/// POST   /{id}/participants                 -> join
/// DELETE /{id}/participants                 -> leave
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(meeting::get_by_id).delete(meeting::cancel))
        .route(
            "/{id}/participants",
            get(meeting::list_participants)
                .post(meeting::join)
                .delete(meeting::leave),
        )
}
