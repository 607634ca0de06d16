pub mod group;
pub mod health;
pub mod meeting;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /groups                                          create
/// /groups/{id}                                     get
/// /groups/{id}/members                             list, join, leave (GET, POST, DELETE)
/// /groups/{id}/meetings                            list, create
///
/// /meetings/{id}                                   get, cancel (GET, DELETE)
/// /meetings/{id}/participants                      list, join, leave (GET, POST, DELETE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/groups", group::router())
        .nest("/meetings", meeting::router())
}
