//! Repositories for the `groups` and `user_groups` tables.
//!
//! Membership writes (`add_member`, `remove_member`, `set_member_count`)
//! take a connection so they can run inside the transaction opened while
//! the group's named lock is held.

use meetup_core::types::DbId;
use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::models::group::{CreateGroup, Group, GroupMember};

/// Column list for `groups` queries.
const COLUMNS: &str =
    "id, name, owner_id, capacity, member_count, deleted_at, created_at, updated_at";

/// Provides CRUD operations for groups and their memberships.
pub struct GroupRepo;

impl GroupRepo {
    /// Create a group whose owner is its first member.
    pub async fn create_with_owner(
        pool: &PgPool,
        owner_id: DbId,
        input: &CreateGroup,
    ) -> Result<Group, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO groups (name, owner_id, capacity, member_count) \
             VALUES ($1, $2, $3, 1) \
             RETURNING {COLUMNS}"
        );
        let group = sqlx::query_as::<_, Group>(&query)
            .bind(&input.name)
            .bind(owner_id)
            .bind(input.capacity)
            .fetch_one(&mut *tx)
            .await?;

        Self::add_member(&mut *tx, group.id, owner_id).await?;

        tx.commit().await?;
        Ok(group)
    }

    /// Find a live group by id.
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<Group>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM groups WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Group>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn is_member<'e>(
        executor: impl PgExecutor<'e>,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM user_groups WHERE group_id = $1 AND user_id = $2)",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(executor)
        .await
    }

    /// Whether `user_id` is a member of the group `meeting_id` belongs to,
    /// taking a share lock on the membership row. A concurrent
    /// [`remove_member`](Self::remove_member) then waits for the caller's
    /// transaction to end.
    pub async fn lock_membership_for_meeting(
        conn: &mut PgConnection,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM user_groups ug \
             JOIN meetings m ON m.group_id = ug.group_id \
             WHERE m.id = $1 AND ug.user_id = $2 \
             FOR SHARE OF ug",
        )
        .bind(meeting_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    /// Members of a group, in joining order.
    pub async fn list_members(
        pool: &PgPool,
        group_id: DbId,
    ) -> Result<Vec<GroupMember>, sqlx::Error> {
        sqlx::query_as::<_, GroupMember>(
            "SELECT group_id, user_id, joined_at FROM user_groups \
             WHERE group_id = $1 ORDER BY joined_at ASC, user_id ASC",
        )
        .bind(group_id)
        .fetch_all(pool)
        .await
    }

    pub async fn add_member(
        conn: &mut PgConnection,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO user_groups (group_id, user_id) VALUES ($1, $2)")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Returns `true` if a membership was removed.
    pub async fn remove_member(
        conn: &mut PgConnection,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM user_groups WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_member_count(
        conn: &mut PgConnection,
        group_id: DbId,
        member_count: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE groups SET member_count = $2, updated_at = NOW() WHERE id = $1")
            .bind(group_id)
            .bind(member_count)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
