//! Repository for the `user_meetings` table (seat records).
//!
//! The connection-level functions are meant to run inside the seat
//! transaction opened by [`crate::seat_store::PgSeatStore`].

use meetup_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::meeting::MeetingParticipant;

/// Provides access to seat records.
pub struct UserMeetingRepo;

impl UserMeetingRepo {
    /// Users seated in a meeting, in joining order.
    pub async fn list_participants(
        pool: &PgPool,
        meeting_id: DbId,
    ) -> Result<Vec<MeetingParticipant>, sqlx::Error> {
        sqlx::query_as::<_, MeetingParticipant>(
            "SELECT meeting_id, user_id, joined_at FROM user_meetings \
             WHERE meeting_id = $1 ORDER BY joined_at ASC, user_id ASC",
        )
        .bind(meeting_id)
        .fetch_all(pool)
        .await
    }

    /// Number of seat records of a meeting.
    pub async fn count(pool: &PgPool, meeting_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_meetings WHERE meeting_id = $1")
            .bind(meeting_id)
            .fetch_one(pool)
            .await
    }

    pub async fn exists(
        conn: &mut PgConnection,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM user_meetings WHERE meeting_id = $1 AND user_id = $2)",
        )
        .bind(meeting_id)
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn insert(
        conn: &mut PgConnection,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO user_meetings (meeting_id, user_id) VALUES ($1, $2)")
            .bind(meeting_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Returns `true` if a record was deleted.
    pub async fn delete(
        conn: &mut PgConnection,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM user_meetings WHERE meeting_id = $1 AND user_id = $2")
                .bind(meeting_id)
                .bind(user_id)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
