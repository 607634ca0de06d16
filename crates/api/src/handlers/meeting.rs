//! Handlers for meetings and their participants.
//!
//! Seat changes (join, leave) go through the reservation engine, which picks
//! the concurrency strategy from the meeting type. Everything else is plain
//! repository access.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use meetup_core::error::CoreError;
use meetup_core::meeting::ensure_can_create;
use meetup_core::reservation::SeatChange;
use meetup_core::types::DbId;
use meetup_db::models::meeting::{CreateMeeting, Meeting, MeetingParticipant};
use meetup_db::repositories::{GroupRepo, MeetingRepo, UserMeetingRepo};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::handlers::detached;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

async fn find_meeting(state: &AppState, id: DbId) -> AppResult<Meeting> {
    MeetingRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::meeting_not_found(id)))
}

/// POST /api/v1/groups/{group_id}/meetings
///
/// Regular meetings may only be created by the group owner, flash meetings
/// by any member. The creator takes the first seat.
pub async fn create(
    State(state): State<AppState>,
    Path(group_id): Path<DbId>,
    user: AuthUser,
    Json(input): Json<CreateMeeting>,
) -> AppResult<(StatusCode, Json<DataResponse<Meeting>>)> {
    input.validate()?;

    let group = GroupRepo::find_by_id(&state.pool, group_id)
        .await?
        .ok_or(AppError::Core(CoreError::group_not_found(group_id)))?;
    let is_member = GroupRepo::is_member(&state.pool, group_id, user.user_id).await?;
    ensure_can_create(input.meeting_type, group.owner_id == user.user_id, is_member)?;

    let meeting = MeetingRepo::create_with_creator(&state.pool, group_id, user.user_id, &input)
        .await?;

    tracing::info!(
        meeting_id = meeting.id,
        group_id,
        meeting_type = %meeting.meeting_type,
        capacity = meeting.capacity,
        created_by = user.user_id,
        "Meeting created"
    );
    Ok((StatusCode::CREATED, Json(DataResponse { data: meeting })))
}

/// GET /api/v1/groups/{group_id}/meetings
pub async fn list_by_group(
    State(state): State<AppState>,
    Path(group_id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<Meeting>>>> {
    GroupRepo::find_by_id(&state.pool, group_id)
        .await?
        .ok_or(AppError::Core(CoreError::group_not_found(group_id)))?;

    let meetings = MeetingRepo::list_by_group(&state.pool, group_id).await?;
    Ok(Json(DataResponse { data: meetings }))
}

/// GET /api/v1/meetings/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Meeting>>> {
    let meeting = find_meeting(&state, id).await?;
    Ok(Json(DataResponse { data: meeting }))
}

/// DELETE /api/v1/meetings/{id}
///
/// Only the creator may cancel. The soft delete bumps the row version, so a
/// seat change racing with it fails instead of writing to a dead meeting.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    user: AuthUser,
) -> AppResult<StatusCode> {
    let meeting = find_meeting(&state, id).await?;
    if meeting.created_by != user.user_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Only the creator can cancel a meeting".into(),
        )));
    }

    if MeetingRepo::soft_delete(&state.pool, id).await? {
        tracing::info!(meeting_id = id, user_id = user.user_id, "Meeting cancelled");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Core(CoreError::meeting_not_found(id)))
    }
}

/// POST /api/v1/meetings/{id}/participants
///
/// Claim a seat. Only members of the meeting's group may join; membership
/// is checked inside the seat transaction.
pub async fn join(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<SeatChange>>> {
    let engine = state.engine.clone();
    let change =
        detached(async move { engine.join_meeting_as_member(id, user.user_id).await }).await?;
    Ok(Json(DataResponse { data: change }))
}

/// DELETE /api/v1/meetings/{id}/participants
pub async fn leave(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<SeatChange>>> {
    let engine = state.engine.clone();
    let change = detached(async move { engine.leave_meeting(id, user.user_id).await }).await?;
    Ok(Json(DataResponse { data: change }))
}

/// GET /api/v1/meetings/{id}/participants
pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<MeetingParticipant>>>> {
    find_meeting(&state, id).await?;
    let participants = UserMeetingRepo::list_participants(&state.pool, id).await?;
    Ok(Json(DataResponse { data: participants }))
}
