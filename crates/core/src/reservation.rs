//! Meeting capacity reservation engine.
//!
//! Seats of a meeting are claimed and released through [`ReservationEngine`],
//! which keeps `join_count <= capacity` and keeps `join_count` equal to the
//! number of join records, under any number of concurrent requests and
//! server instances.
//!
//! Every seat change runs the same transaction body (load seats, check the
//! transition, write the join record and the counter, commit). What differs
//! per meeting type is the concurrency control wrapped around it, chosen by
//! [`StrategyTable::strategy_for`]:
//!
//! - regular meetings lock the meeting row (`FOR UPDATE`),
//! - flash meetings serialize through the named lock `meeting{id}`,
//! - the optimistic strategy relies on the versioned counter write and
//!   retries on conflict.
//!
//! Storage is abstracted behind [`SeatStore`] / [`SeatTx`]; the PostgreSQL
//! implementation lives in the db crate and an in-memory one in
//! [`crate::memory`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CoreError;
use crate::locking::{with_named_lock, DistributedLock};
use crate::meeting::{
    meeting_lock_key, ConcurrencyStrategy, JoinState, MeetingType, SeatSnapshot, SeatTransition,
    StrategyTable, DEFAULT_NAMED_LOCK_TIMEOUT,
};
use crate::retry::{with_optimistic_retry, RetryPolicy};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Storage capability
// ---------------------------------------------------------------------------

/// Whether reading the meeting row also locks it until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    None,
    ForUpdate,
}

/// A store of meetings and join records that can open atomic units of work.
#[async_trait]
pub trait SeatStore: Send + Sync {
    type Tx: SeatTx;

    /// Open a transaction. Dropping it without [`SeatTx::commit`] rolls
    /// everything back and releases any row locks it took.
    async fn begin(&self) -> Result<Self::Tx, CoreError>;

    /// Type of a live meeting, read without locking (the type is immutable).
    async fn meeting_type(&self, meeting_id: DbId) -> Result<Option<MeetingType>, CoreError>;

    /// Live meetings of `group_id` that `user_id` holds a seat in.
    async fn joined_meetings(&self, group_id: DbId, user_id: DbId)
        -> Result<Vec<DbId>, CoreError>;

    /// Soft-delete meetings of `group_id` created by `user_id` whose only
    /// seated user is that creator. Returns how many were removed.
    async fn prune_solo_meetings(&self, group_id: DbId, user_id: DbId) -> Result<u64, CoreError>;
}

/// One atomic unit of seat work.
#[async_trait]
pub trait SeatTx: Send + Sized {
    /// Read the seat columns of a live meeting. With [`RowLock::ForUpdate`]
    /// the row stays locked until the transaction ends; a lock wait that
    /// exceeds the store's budget fails with `TooManyRequests`.
    async fn load_seats(
        &mut self,
        meeting_id: DbId,
        lock: RowLock,
    ) -> Result<Option<SeatSnapshot>, CoreError>;

    async fn is_joined(&mut self, meeting_id: DbId, user_id: DbId) -> Result<bool, CoreError>;

    /// Whether `user_id` belongs to the group of `meeting_id`. A membership
    /// that is seen stays locked until the transaction ends, so removing it
    /// concurrently waits for this transaction.
    async fn holds_group_membership(
        &mut self,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<bool, CoreError>;

    /// Insert the join record. A duplicate fails with `AlreadyJoined`.
    async fn insert_join(&mut self, meeting_id: DbId, user_id: DbId) -> Result<(), CoreError>;

    /// Delete the join record. Returns `false` if there was none.
    async fn delete_join(&mut self, meeting_id: DbId, user_id: DbId) -> Result<bool, CoreError>;

    /// Write `join_count`, provided the row still carries `seats.version`.
    /// Otherwise fails with `OptimisticConflict`.
    async fn write_join_count(
        &mut self,
        seats: &SeatSnapshot,
        join_count: i32,
    ) -> Result<(), CoreError>;

    async fn commit(self) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Tunables of the reservation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    pub strategies: StrategyTable,
    /// Wait budget of the `meeting{id}` named lock.
    pub named_lock_timeout: Duration,
    /// Attempts and backoff of the optimistic strategy.
    pub retry: RetryPolicy,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            strategies: StrategyTable::default(),
            named_lock_timeout: DEFAULT_NAMED_LOCK_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Who may claim a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Anyone,
    GroupMembers,
}

/// Outcome of a successful join or leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatChange {
    pub meeting_id: DbId,
    pub user_id: DbId,
    pub state: JoinState,
    pub join_count: i32,
    pub capacity: i32,
}

/// Outcome of removing a user from every meeting of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WithdrawSummary {
    /// Meetings soft-deleted because the user was their creator and only
    /// participant.
    pub pruned: u64,
    /// Meetings the user gave up a seat in.
    pub left: u64,
}

/// Join/leave state machine over a [`SeatStore`], guarded per meeting type.
pub struct ReservationEngine<S, L> {
    store: S,
    lock: L,
    policy: ReservationPolicy,
}

impl<S, L> ReservationEngine<S, L>
where
    S: SeatStore,
    L: DistributedLock,
{
    pub fn new(store: S, lock: L, policy: ReservationPolicy) -> Self {
        Self {
            store,
            lock,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Concurrency strategy guarding `meeting_id`.
    pub async fn strategy_of(&self, meeting_id: DbId) -> Result<ConcurrencyStrategy, CoreError> {
        let meeting_type = self
            .store
            .meeting_type(meeting_id)
            .await?
            .ok_or_else(|| CoreError::meeting_not_found(meeting_id))?;
        Ok(self.policy.strategies.strategy_for(meeting_type))
    }

    /// Claim a seat. Fails with `MeetingFull`, `AlreadyJoined`,
    /// `NotFound` or, under contention, `TooManyRequests`.
    pub async fn join_meeting(
        &self,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<SeatChange, CoreError> {
        self.transition(meeting_id, user_id, SeatTransition::Join, Admission::Anyone)
            .await
    }

    /// Like [`join_meeting`](Self::join_meeting), for members of the
    /// meeting's group only (`Forbidden` otherwise). Membership is checked
    /// inside the seat transaction, so a seat is never granted to a user
    /// whose membership was removed before the seat became visible.
    pub async fn join_meeting_as_member(
        &self,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<SeatChange, CoreError> {
        self.transition(
            meeting_id,
            user_id,
            SeatTransition::Join,
            Admission::GroupMembers,
        )
        .await
    }

    /// Give up a seat. Fails with `NotJoined`, `NotFound` or, under
    /// contention, `TooManyRequests`.
    pub async fn leave_meeting(
        &self,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<SeatChange, CoreError> {
        self.transition(meeting_id, user_id, SeatTransition::Leave, Admission::Anyone)
            .await
    }

    /// Remove `user_id` from every meeting of `group_id`.
    ///
    /// Meetings the user created and is alone in are pruned first (soft
    /// delete); every other seat is released through the meeting's own
    /// strategy. Seats that vanished concurrently are skipped.
    pub async fn withdraw_from_group(
        &self,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<WithdrawSummary, CoreError> {
        let pruned = self.store.prune_solo_meetings(group_id, user_id).await?;
        if pruned > 0 {
            tracing::info!(group_id, user_id, pruned, "Pruned solo meetings");
        }

        let mut left = 0;
        for meeting_id in self.store.joined_meetings(group_id, user_id).await? {
            match self.leave_meeting(meeting_id, user_id).await {
                Ok(_) => left += 1,
                Err(CoreError::NotJoined { .. }) | Err(CoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(WithdrawSummary { pruned, left })
    }

    async fn transition(
        &self,
        meeting_id: DbId,
        user_id: DbId,
        transition: SeatTransition,
        admission: Admission,
    ) -> Result<SeatChange, CoreError> {
        let strategy = self.strategy_of(meeting_id).await?;

        let result = match strategy {
            ConcurrencyStrategy::RowLock => {
                self.apply(meeting_id, user_id, transition, admission, RowLock::ForUpdate)
                    .await
            }
            ConcurrencyStrategy::NamedLock => {
                with_named_lock(
                    &self.lock,
                    &meeting_lock_key(meeting_id),
                    self.policy.named_lock_timeout,
                    || self.apply(meeting_id, user_id, transition, admission, RowLock::None),
                )
                .await
            }
            ConcurrencyStrategy::OptimisticRetry => {
                with_optimistic_retry(&self.policy.retry, || {
                    self.apply(meeting_id, user_id, transition, admission, RowLock::None)
                })
                .await
            }
        };

        match result {
            Ok(change) => {
                tracing::info!(
                    meeting_id,
                    user_id,
                    ?strategy,
                    state = ?change.state,
                    join_count = change.join_count,
                    capacity = change.capacity,
                    "Seat updated"
                );
                Ok(change)
            }
            // Under a lock, a version conflict means a writer outside the
            // lock (sweep, prune) touched the row. The client may retry.
            Err(CoreError::OptimisticConflict { .. }) => Err(CoreError::TooManyRequests(format!(
                "Meeting {meeting_id} changed concurrently, try again"
            ))),
            Err(e) => {
                tracing::debug!(meeting_id, user_id, ?strategy, error = %e, "Seat change rejected");
                Err(e)
            }
        }
    }

    /// The transaction body shared by every strategy.
    async fn apply(
        &self,
        meeting_id: DbId,
        user_id: DbId,
        transition: SeatTransition,
        admission: Admission,
        lock: RowLock,
    ) -> Result<SeatChange, CoreError> {
        let mut tx = self.store.begin().await?;

        let seats = tx
            .load_seats(meeting_id, lock)
            .await?
            .ok_or_else(|| CoreError::meeting_not_found(meeting_id))?;
        if admission == Admission::GroupMembers
            && !tx.holds_group_membership(meeting_id, user_id).await?
        {
            return Err(CoreError::Forbidden(format!(
                "User {user_id} is not a member of the group of meeting {meeting_id}"
            )));
        }
        let state = JoinState::from(tx.is_joined(meeting_id, user_id).await?);
        let join_count = seats.apply(transition, user_id, state)?;

        let new_state = match transition {
            SeatTransition::Join => {
                tx.insert_join(meeting_id, user_id).await?;
                JoinState::Joined
            }
            SeatTransition::Leave => {
                if !tx.delete_join(meeting_id, user_id).await? {
                    return Err(CoreError::NotJoined {
                        meeting_id,
                        user_id,
                    });
                }
                JoinState::NotJoined
            }
        };

        tx.write_join_count(&seats, join_count).await?;
        tx.commit().await?;

        Ok(SeatChange {
            meeting_id,
            user_id,
            state: new_state,
            join_count,
            capacity: seats.capacity,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::{MemoryNamedLock, MemorySeatStore};

    fn engine(store: MemorySeatStore) -> ReservationEngine<MemorySeatStore, MemoryNamedLock> {
        ReservationEngine::new(store, MemoryNamedLock::new(), ReservationPolicy::default())
    }

    #[tokio::test]
    async fn test_sequential_joins_fill_then_reject() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Regular, 100, 5);
        let engine = engine(store.clone());

        for user in 1..=5 {
            engine.join_meeting(id, user).await.unwrap();
        }
        assert_eq!(store.join_count(id), Some(5));

        assert_matches!(
            engine.join_meeting(id, 6).await,
            Err(CoreError::MeetingFull { capacity: 5, .. })
        );
        assert_eq!(store.join_count(id), Some(5));
        assert_eq!(store.participants(id).len(), 5);
    }

    #[tokio::test]
    async fn test_flash_join_leave_join() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 100, 2);
        let engine = engine(store.clone());

        engine.join_meeting(id, 1).await.unwrap();
        engine.join_meeting(id, 2).await.unwrap();
        let left = engine.leave_meeting(id, 1).await.unwrap();
        assert_eq!(left.state, JoinState::NotJoined);
        assert_eq!(left.join_count, 1);
        engine.join_meeting(id, 3).await.unwrap();

        assert_eq!(store.join_count(id), Some(2));
        assert_eq!(store.participants(id), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_flash_path_releases_named_lock() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 100, 1);
        let engine = engine(store);

        engine.join_meeting(id, 1).await.unwrap();
        assert_matches!(
            engine.join_meeting(id, 2).await,
            Err(CoreError::MeetingFull { .. })
        );
        assert_matches!(
            engine.leave_meeting(id, 3).await,
            Err(CoreError::NotJoined { .. })
        );
        assert!(!engine.lock.is_held(&meeting_lock_key(id)));
    }

    #[tokio::test]
    async fn test_flash_join_fails_fast_while_lock_is_held_elsewhere() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 100, 3);
        let policy = ReservationPolicy {
            named_lock_timeout: Duration::from_millis(20),
            ..ReservationPolicy::default()
        };
        let engine = ReservationEngine::new(store.clone(), MemoryNamedLock::new(), policy);
        assert!(engine
            .lock
            .acquire(&meeting_lock_key(id), Duration::ZERO)
            .await
            .unwrap());

        assert_matches!(
            engine.join_meeting(id, 1).await,
            Err(CoreError::TooManyRequests(_))
        );
        assert_eq!(store.join_count(id), Some(0));
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Regular, 100, 5);
        let engine = engine(store.clone());

        engine.join_meeting(id, 1).await.unwrap();
        assert_matches!(
            engine.join_meeting(id, 1).await,
            Err(CoreError::AlreadyJoined { .. })
        );
        assert_eq!(store.join_count(id), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_and_deleted_meetings_are_not_found() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 100, 5);
        store.soft_delete(id);
        let engine = engine(store);

        assert_matches!(
            engine.join_meeting(999, 1).await,
            Err(CoreError::NotFound {
                entity: "Meeting",
                id: 999
            })
        );
        assert_matches!(
            engine.leave_meeting(id, 1).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_regular_row_lock_timeout_surfaces_as_too_many_requests() {
        let store = MemorySeatStore::with_row_lock_timeout(Duration::from_millis(20));
        let id = store.add_meeting(1, MeetingType::Regular, 100, 5);
        let engine = engine(store.clone());

        let mut blocker = store.begin().await.unwrap();
        blocker.load_seats(id, RowLock::ForUpdate).await.unwrap();

        assert_matches!(
            engine.join_meeting(id, 1).await,
            Err(CoreError::TooManyRequests(_))
        );

        drop(blocker);
        engine.join_meeting(id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_optimistic_strategy_joins_and_leaves() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 100, 2);
        let policy = ReservationPolicy {
            strategies: StrategyTable {
                flash: ConcurrencyStrategy::OptimisticRetry,
            },
            ..ReservationPolicy::default()
        };
        let engine = ReservationEngine::new(store.clone(), MemoryNamedLock::new(), policy);

        assert_eq!(
            engine.strategy_of(id).await.unwrap(),
            ConcurrencyStrategy::OptimisticRetry
        );
        engine.join_meeting(id, 1).await.unwrap();
        engine.join_meeting(id, 2).await.unwrap();
        assert_matches!(
            engine.join_meeting(id, 3).await,
            Err(CoreError::MeetingFull { .. })
        );
        engine.leave_meeting(id, 2).await.unwrap();
        assert_eq!(store.join_count(id), Some(1));
    }

    #[tokio::test]
    async fn test_withdraw_prunes_solo_meetings_and_leaves_others() {
        let store = MemorySeatStore::new();
        let own_solo = store.add_meeting(1, MeetingType::Flash, 10, 4);
        let own_shared = store.add_meeting(1, MeetingType::Flash, 10, 4);
        let other = store.add_meeting(1, MeetingType::Regular, 20, 4);
        let other_group = store.add_meeting(2, MeetingType::Regular, 20, 4);
        let engine = engine(store.clone());

        engine.join_meeting(own_solo, 10).await.unwrap();
        engine.join_meeting(own_shared, 10).await.unwrap();
        engine.join_meeting(own_shared, 11).await.unwrap();
        engine.join_meeting(other, 10).await.unwrap();
        engine.join_meeting(other_group, 10).await.unwrap();

        let summary = engine.withdraw_from_group(1, 10).await.unwrap();

        assert_eq!(summary, WithdrawSummary { pruned: 1, left: 2 });
        assert!(store.is_deleted(own_solo));
        assert!(!store.is_deleted(own_shared));
        assert_eq!(store.participants(own_shared), vec![11]);
        assert_eq!(store.join_count(other), Some(0));
        // Meetings of other groups are untouched.
        assert_eq!(store.participants(other_group), vec![10]);
    }

    #[tokio::test]
    async fn test_member_join_requires_current_membership() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 100, 5);
        store.add_member(1, 100);
        store.add_member(1, 7);
        let engine = engine(store.clone());

        assert_matches!(
            engine.join_meeting_as_member(id, 8).await,
            Err(CoreError::Forbidden(_))
        );
        engine.join_meeting_as_member(id, 7).await.unwrap();

        assert!(store.remove_member(1, 7));
        engine.leave_meeting(id, 7).await.unwrap();
        assert_matches!(
            engine.join_meeting_as_member(id, 7).await,
            Err(CoreError::Forbidden(_))
        );
        assert_eq!(store.participants(id), Vec::<DbId>::new());
        assert_eq!(store.join_count(id), Some(0));
    }

    #[tokio::test]
    async fn test_member_join_checked_under_every_strategy() {
        for flash in [
            ConcurrencyStrategy::NamedLock,
            ConcurrencyStrategy::OptimisticRetry,
        ] {
            let store = MemorySeatStore::new();
            let regular = store.add_meeting(3, MeetingType::Regular, 100, 5);
            let flash_id = store.add_meeting(3, MeetingType::Flash, 100, 5);
            let policy = ReservationPolicy {
                strategies: StrategyTable { flash },
                ..ReservationPolicy::default()
            };
            let engine = ReservationEngine::new(store.clone(), MemoryNamedLock::new(), policy);

            for id in [regular, flash_id] {
                assert_matches!(
                    engine.join_meeting_as_member(id, 4).await,
                    Err(CoreError::Forbidden(_))
                );
            }
            store.add_member(3, 4);
            for id in [regular, flash_id] {
                engine.join_meeting_as_member(id, 4).await.unwrap();
                assert_eq!(store.participants(id), vec![4]);
            }
        }
    }
}
