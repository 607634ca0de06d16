//! Repository for the `meetings` table.
//!
//! Seat counters (`join_count`) are not written here: every seat change goes
//! through the reservation engine and [`crate::seat_store::PgSeatStore`].
//! Writes in this module that may race with the engine (soft deletes,
//! pruning) bump `version` so an in-flight seat write notices.

use meetup_core::meeting::MeetingType;
use meetup_core::types::DbId;
use sqlx::PgPool;

use crate::models::meeting::{CreateMeeting, Meeting};

/// Column list for `meetings` queries.
pub(crate) const COLUMNS: &str = "id, group_id, meeting_type, title, place, cost, starts_at, \
                                  capacity, join_count, created_by, version, deleted_at, \
                                  created_at, updated_at";

/// Provides CRUD operations for meetings.
pub struct MeetingRepo;

impl MeetingRepo {
    /// Create a meeting with its creator already seated (`join_count = 1`).
    ///
    /// The meeting row and the creator's seat are written in one
    /// transaction.
    pub async fn create_with_creator(
        pool: &PgPool,
        group_id: DbId,
        created_by: DbId,
        input: &CreateMeeting,
    ) -> Result<Meeting, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO meetings \
                 (group_id, meeting_type, title, place, cost, starts_at, capacity, \
                  join_count, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8) \
             RETURNING {COLUMNS}"
        );
        let meeting = sqlx::query_as::<_, Meeting>(&query)
            .bind(group_id)
            .bind(input.meeting_type.as_str())
            .bind(&input.title)
            .bind(&input.place)
            .bind(input.cost.unwrap_or(0))
            .bind(input.starts_at)
            .bind(input.capacity)
            .bind(created_by)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO user_meetings (meeting_id, user_id) VALUES ($1, $2)")
            .bind(meeting.id)
            .bind(created_by)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(meeting)
    }

    /// Find a live meeting by id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Meeting>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM meetings WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Meeting>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Type of a live meeting.
    pub async fn find_type(pool: &PgPool, id: DbId) -> Result<Option<MeetingType>, sqlx::Error> {
        let raw = sqlx::query_scalar::<_, String>(
            "SELECT meeting_type FROM meetings WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        raw.map(|t| t.parse::<MeetingType>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    /// List live meetings of a group, soonest first.
    pub async fn list_by_group(pool: &PgPool, group_id: DbId) -> Result<Vec<Meeting>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM meetings \
             WHERE group_id = $1 AND deleted_at IS NULL \
             ORDER BY starts_at ASC, id ASC"
        );
        sqlx::query_as::<_, Meeting>(&query)
            .bind(group_id)
            .fetch_all(pool)
            .await
    }

    /// Soft-delete a meeting. Returns `true` if a live row was deleted.
    pub async fn soft_delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE meetings \
             SET deleted_at = NOW(), updated_at = NOW(), version = version + 1 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete every live meeting whose start time has passed.
    /// Returns the number of meetings removed.
    pub async fn soft_delete_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE meetings \
             SET deleted_at = NOW(), updated_at = NOW(), version = version + 1 \
             WHERE deleted_at IS NULL AND starts_at < NOW()",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Live meetings of `group_id` in which `user_id` holds a seat.
    pub async fn joined_in_group(
        pool: &PgPool,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT m.id FROM meetings m \
             JOIN user_meetings um ON um.meeting_id = m.id \
             WHERE m.group_id = $1 AND um.user_id = $2 AND m.deleted_at IS NULL \
             ORDER BY m.id",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Soft-delete meetings of `group_id` created by `user_id` in which the
    /// creator is the only seated user.
    ///
    /// The conditions are re-checked by the `UPDATE` itself, so a seat
    /// taken concurrently either lands first (and the meeting survives) or
    /// fails its version check afterwards.
    pub async fn prune_solo(
        pool: &PgPool,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE meetings m \
             SET deleted_at = NOW(), updated_at = NOW(), version = version + 1 \
             WHERE m.group_id = $1 AND m.created_by = $2 AND m.deleted_at IS NULL \
               AND m.join_count = 1 \
               AND EXISTS ( \
                   SELECT 1 FROM user_meetings um \
                   WHERE um.meeting_id = m.id AND um.user_id = $2 \
               )",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
