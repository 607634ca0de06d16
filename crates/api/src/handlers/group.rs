//! Handlers for groups and group membership.
//!
//! Membership changes of a group are serialized through the named lock
//! `group{id}`: the capacity check and the counter write happen inside it.
//! Meeting seats are never touched while that lock is held, so a handler
//! holds at most one lock-pool session at a time.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use meetup_core::error::CoreError;
use meetup_core::locking::with_named_lock;
use meetup_core::meeting::group_lock_key;
use meetup_core::reservation::WithdrawSummary;
use meetup_core::types::DbId;
use meetup_db::error::{constraint, to_core};
use meetup_db::models::group::{CreateGroup, Group, GroupMember};
use meetup_db::repositories::GroupRepo;
use meetup_db::DbPool;
use serde::Serialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::handlers::detached;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::{AppState, Engine};

/// Primary key of `user_groups`.
const UQ_USER_GROUPS: &str = "uq_user_groups_group_user";

/// Result of a membership change.
#[derive(Debug, Serialize)]
pub struct MembershipChange {
    pub group_id: DbId,
    pub user_id: DbId,
    pub member_count: i32,
    pub capacity: i32,
    /// Meeting seats given up when leaving; absent on join.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawn: Option<WithdrawSummary>,
}

/// POST /api/v1/groups
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CreateGroup>,
) -> AppResult<(StatusCode, Json<DataResponse<Group>>)> {
    input.validate()?;
    let group = GroupRepo::create_with_owner(&state.pool, user.user_id, &input).await?;
    tracing::info!(group_id = group.id, owner_id = user.user_id, "Group created");
    Ok((StatusCode::CREATED, Json(DataResponse { data: group })))
}

/// GET /api/v1/groups/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Group>>> {
    let group = GroupRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::group_not_found(id)))?;
    Ok(Json(DataResponse { data: group }))
}

/// GET /api/v1/groups/{id}/members
pub async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<GroupMember>>>> {
    GroupRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::group_not_found(id)))?;

    let members = GroupRepo::list_members(&state.pool, id).await?;
    Ok(Json(DataResponse { data: members }))
}

/// POST /api/v1/groups/{id}/members
pub async fn join(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<MembershipChange>>> {
    let lock = state.named_lock.clone();
    let timeout = state.config.reservation.named_lock_timeout;
    let pool = state.pool.clone();

    let change = detached(async move {
        with_named_lock(&*lock, &group_lock_key(id), timeout, || {
            add_member(&pool, id, user.user_id)
        })
        .await
    })
    .await?;

    Ok(Json(DataResponse { data: change }))
}

/// DELETE /api/v1/groups/{id}/members
///
/// The owner cannot leave. The membership goes first, under the group lock.
/// Then, with the group lock released, the member gives up every seat in
/// the group's meetings; meetings they created and are alone in are
/// cancelled. Seat joins re-check membership inside their own transaction,
/// so no new seat can appear once the membership is gone.
pub async fn leave(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<MembershipChange>>> {
    let lock = state.named_lock.clone();
    let timeout = state.config.reservation.named_lock_timeout;
    let pool = state.pool.clone();
    let engine = state.engine.clone();

    let change = detached(async move {
        let left = with_named_lock(&*lock, &group_lock_key(id), timeout, || {
            remove_member(&pool, id, user.user_id)
        })
        .await;
        match left {
            Ok(change) => withdraw_seats(&engine, change).await,
            Err(e) => Err(e),
        }
    })
    .await?;

    Ok(Json(DataResponse { data: change }))
}

// ---------------------------------------------------------------------------
// Membership changes (`add_member` and `remove_member` run holding `group{id}`)
// ---------------------------------------------------------------------------

async fn add_member(
    pool: &DbPool,
    group_id: DbId,
    user_id: DbId,
) -> Result<MembershipChange, CoreError> {
    let db = |e: sqlx::Error| {
        if constraint(&e) == Some(UQ_USER_GROUPS) {
            CoreError::AlreadyMember { group_id, user_id }
        } else {
            to_core(e, "Group", group_id)
        }
    };

    let mut tx = pool.begin().await.map_err(db)?;
    let group = GroupRepo::find_by_id(&mut *tx, group_id)
        .await
        .map_err(db)?
        .ok_or_else(|| CoreError::group_not_found(group_id))?;
    let is_member = GroupRepo::is_member(&mut *tx, group_id, user_id)
        .await
        .map_err(db)?;

    let member_count = match group.seats().join(user_id, is_member) {
        Ok(count) => count,
        Err(e) => {
            tracing::debug!(group_id, user_id, error = %e, "Group join rejected");
            return Err(e);
        }
    };

    GroupRepo::add_member(&mut *tx, group_id, user_id)
        .await
        .map_err(db)?;
    GroupRepo::set_member_count(&mut *tx, group_id, member_count)
        .await
        .map_err(db)?;
    tx.commit().await.map_err(db)?;

    tracing::info!(group_id, user_id, member_count, "Joined group");
    Ok(MembershipChange {
        group_id,
        user_id,
        member_count,
        capacity: group.capacity,
        withdrawn: None,
    })
}

async fn remove_member(
    pool: &DbPool,
    group_id: DbId,
    user_id: DbId,
) -> Result<MembershipChange, CoreError> {
    let db = |e: sqlx::Error| to_core(e, "Group", group_id);

    let mut tx = pool.begin().await.map_err(db)?;
    let group = GroupRepo::find_by_id(&mut *tx, group_id)
        .await
        .map_err(db)?
        .ok_or_else(|| CoreError::group_not_found(group_id))?;
    let is_member = GroupRepo::is_member(&mut *tx, group_id, user_id)
        .await
        .map_err(db)?;
    let member_count = match group.seats().leave(user_id, is_member) {
        Ok(count) => count,
        Err(e) => {
            tracing::debug!(group_id, user_id, error = %e, "Group leave rejected");
            return Err(e);
        }
    };

    GroupRepo::remove_member(&mut *tx, group_id, user_id)
        .await
        .map_err(db)?;
    GroupRepo::set_member_count(&mut *tx, group_id, member_count)
        .await
        .map_err(db)?;
    tx.commit().await.map_err(db)?;

    tracing::info!(group_id, user_id, member_count, "Left group");
    Ok(MembershipChange {
        group_id,
        user_id,
        member_count,
        capacity: group.capacity,
        withdrawn: None,
    })
}

/// Give up every seat a former member holds in the group's meetings.
///
/// Runs after the membership is gone and outside the group lock. Each seat
/// is released in its own transaction, so a failure part way leaves the
/// remaining seats in place; they can still be given up one by one.
async fn withdraw_seats(
    engine: &Engine,
    mut change: MembershipChange,
) -> Result<MembershipChange, CoreError> {
    let (group_id, user_id) = (change.group_id, change.user_id);
    match engine.withdraw_from_group(group_id, user_id).await {
        Ok(withdrawn) => {
            tracing::info!(
                group_id,
                user_id,
                pruned = withdrawn.pruned,
                left = withdrawn.left,
                "Withdrew former member from meetings"
            );
            change.withdrawn = Some(withdrawn);
            Ok(change)
        }
        Err(e) => {
            tracing::error!(group_id, user_id, error = %e, "Failed to withdraw former member");
            Err(e)
        }
    }
}
