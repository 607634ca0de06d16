//! Route definitions for the `/groups` resource.
//!
//! Also nests the group's meetings under `/groups/{id}/meetings`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{group, meeting};
use crate::state::AppState;

/// Routes mounted at `/groups`.
///
/// ```text
/// POST   /                                  -> create
/// GET    /{id}                              -> get_by_id
/// GET    /{id}/members                      -> list_members
/// POST   /{id}/members                      -> join
/// DELETE /{id}/members                      -> leave
///
/// GET    /{id}/meetings                     -> list_by_group
/// POST   /{id}/meetings                     -> create
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(group::create))
        .route("/{id}", get(group::get_by_id))
        .route(
            "/{id}/members",
            get(group::list_members)
                .post(group::join)
                .delete(group::leave),
        )
        .route(
            "/{id}/meetings",
            get(meeting::list_by_group).post(meeting::create),
        )
}
