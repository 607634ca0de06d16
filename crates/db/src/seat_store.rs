//! PostgreSQL-backed [`SeatStore`].
//!
//! A seat transaction is a plain sqlx transaction. With
//! [`RowLock::ForUpdate`] the meeting row is read with
//! `SELECT ... FOR UPDATE` under a transaction-local `lock_timeout`, so a
//! contended regular meeting queues its joiners at the row and each waits at
//! most `row_lock_timeout` before failing with `TooManyRequests`.
//!
//! The counter write is always version-checked; under a lock the check
//! cannot fail unless something outside the lock touched the row.

use std::time::Duration;

use async_trait::async_trait;
use meetup_core::error::CoreError;
use meetup_core::meeting::{MeetingType, SeatSnapshot};
use meetup_core::reservation::{RowLock, SeatStore, SeatTx};
use meetup_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{constraint, to_core};
use crate::models::meeting::Meeting;
use crate::repositories::meeting_repo::COLUMNS;
use crate::repositories::{GroupRepo, MeetingRepo, UserMeetingRepo};

/// Name of the primary key of `user_meetings`.
const UQ_USER_MEETINGS: &str = "uq_user_meetings_meeting_user";

/// Seat store over the `meetings` and `user_meetings` tables.
#[derive(Clone)]
pub struct PgSeatStore {
    pool: PgPool,
    row_lock_timeout: Duration,
}

impl PgSeatStore {
    pub fn new(pool: PgPool, row_lock_timeout: Duration) -> Self {
        Self {
            pool,
            row_lock_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    type Tx = PgSeatTx;

    async fn begin(&self) -> Result<PgSeatTx, CoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to begin transaction: {e}")))?;
        Ok(PgSeatTx {
            tx,
            row_lock_timeout: self.row_lock_timeout,
        })
    }

    async fn meeting_type(&self, meeting_id: DbId) -> Result<Option<MeetingType>, CoreError> {
        MeetingRepo::find_type(&self.pool, meeting_id)
            .await
            .map_err(|e| to_core(e, "Meeting", meeting_id))
    }

    async fn joined_meetings(
        &self,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<Vec<DbId>, CoreError> {
        MeetingRepo::joined_in_group(&self.pool, group_id, user_id)
            .await
            .map_err(|e| to_core(e, "Group", group_id))
    }

    async fn prune_solo_meetings(&self, group_id: DbId, user_id: DbId) -> Result<u64, CoreError> {
        MeetingRepo::prune_solo(&self.pool, group_id, user_id)
            .await
            .map_err(|e| to_core(e, "Group", group_id))
    }
}

/// A seat transaction. Dropping it rolls back and releases row locks.
pub struct PgSeatTx {
    tx: Transaction<'static, Postgres>,
    row_lock_timeout: Duration,
}

#[async_trait]
impl SeatTx for PgSeatTx {
    async fn load_seats(
        &mut self,
        meeting_id: DbId,
        lock: RowLock,
    ) -> Result<Option<SeatSnapshot>, CoreError> {
        let query = match lock {
            RowLock::None => format!(
                "SELECT {COLUMNS} FROM meetings WHERE id = $1 AND deleted_at IS NULL"
            ),
            RowLock::ForUpdate => {
                sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                    .bind(format!("{}ms", self.row_lock_timeout.as_millis().max(1)))
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| to_core(e, "Meeting", meeting_id))?;
                format!(
                    "SELECT {COLUMNS} FROM meetings WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
                )
            }
        };

        let meeting = sqlx::query_as::<_, Meeting>(&query)
            .bind(meeting_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| to_core(e, "Meeting", meeting_id))?;

        Ok(meeting.map(|m| m.seats()))
    }

    async fn is_joined(&mut self, meeting_id: DbId, user_id: DbId) -> Result<bool, CoreError> {
        UserMeetingRepo::exists(&mut *self.tx, meeting_id, user_id)
            .await
            .map_err(|e| to_core(e, "Meeting", meeting_id))
    }

    async fn holds_group_membership(
        &mut self,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<bool, CoreError> {
        GroupRepo::lock_membership_for_meeting(&mut *self.tx, meeting_id, user_id)
            .await
            .map_err(|e| to_core(e, "Meeting", meeting_id))
    }

    async fn insert_join(&mut self, meeting_id: DbId, user_id: DbId) -> Result<(), CoreError> {
        UserMeetingRepo::insert(&mut *self.tx, meeting_id, user_id)
            .await
            .map_err(|e| {
                if constraint(&e) == Some(UQ_USER_MEETINGS) {
                    CoreError::AlreadyJoined {
                        meeting_id,
                        user_id,
                    }
                } else {
                    to_core(e, "Meeting", meeting_id)
                }
            })
    }

    async fn delete_join(&mut self, meeting_id: DbId, user_id: DbId) -> Result<bool, CoreError> {
        UserMeetingRepo::delete(&mut *self.tx, meeting_id, user_id)
            .await
            .map_err(|e| to_core(e, "Meeting", meeting_id))
    }

    async fn write_join_count(
        &mut self,
        seats: &SeatSnapshot,
        join_count: i32,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE meetings \
             SET join_count = $2, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $3 AND deleted_at IS NULL",
        )
        .bind(seats.meeting_id)
        .bind(join_count)
        .bind(seats.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| to_core(e, "Meeting", seats.meeting_id))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::OptimisticConflict {
                entity: "Meeting",
                id: seats.meeting_id,
            });
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), CoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to commit seat change: {e}")))
    }
}
