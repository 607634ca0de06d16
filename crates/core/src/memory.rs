//! In-process implementations of [`DistributedLock`] and [`SeatStore`].
//!
//! These back the unit and concurrency tests and single-node development.
//! They are not distributed: two processes each get their own locks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::CoreError;
use crate::locking::{DistributedLock, LockError};
use crate::meeting::{MeetingType, SeatSnapshot, DEFAULT_ROW_LOCK_TIMEOUT};
use crate::reservation::{RowLock, SeatStore, SeatTx};
use crate::types::DbId;

type KeyedMutexes<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// Look up (or create) the async mutex registered under `key`.
fn keyed_mutex<K: std::hash::Hash + Eq>(map: &KeyedMutexes<K>, key: K) -> Arc<AsyncMutex<()>> {
    let mut map = lock_std(map);
    Arc::clone(map.entry(key).or_default())
}

/// Poisoning only happens if a test panicked mid-update; keep going with
/// whatever state is there.
fn lock_std<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wait up to `timeout` for `mutex`; a zero timeout only tries once.
async fn lock_within(
    mutex: Arc<AsyncMutex<()>>,
    timeout: Duration,
) -> Option<OwnedMutexGuard<()>> {
    if timeout.is_zero() {
        return mutex.try_lock_owned().ok();
    }
    tokio::time::timeout(timeout, mutex.lock_owned()).await.ok()
}

// ---------------------------------------------------------------------------
// MemoryNamedLock
// ---------------------------------------------------------------------------

/// Named lock backed by one async mutex per key.
#[derive(Default)]
pub struct MemoryNamedLock {
    mutexes: KeyedMutexes<String>,
    held: Mutex<HashMap<String, OwnedMutexGuard<()>>>,
}

impl MemoryNamedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some caller currently holds `key`.
    pub fn is_held(&self, key: &str) -> bool {
        lock_std(&self.held).contains_key(key)
    }
}

#[async_trait]
impl DistributedLock for MemoryNamedLock {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, LockError> {
        let mutex = keyed_mutex(&self.mutexes, key.to_string());
        match lock_within(mutex, timeout).await {
            Some(guard) => {
                lock_std(&self.held).insert(key.to_string(), guard);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, key: &str) -> Result<bool, LockError> {
        Ok(lock_std(&self.held).remove(key).is_some())
    }

    fn release_detached(&self, key: &str) {
        lock_std(&self.held).remove(key);
    }
}

// ---------------------------------------------------------------------------
// MemorySeatStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MeetingRow {
    seats: SeatSnapshot,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    next_id: DbId,
    meetings: HashMap<DbId, MeetingRow>,
    joins: HashSet<(DbId, DbId)>,
    /// `(group_id, user_id)` memberships.
    members: HashSet<(DbId, DbId)>,
}

struct Inner {
    state: Mutex<StoreState>,
    row_locks: KeyedMutexes<DbId>,
    row_lock_timeout: Duration,
}

/// Seat store keeping meetings and join records in memory.
///
/// Writes are staged in the transaction and applied atomically at commit,
/// with the same checks the database enforces (unique join records,
/// version match, `join_count <= capacity`). Row locks are per-meeting
/// async mutexes held until the transaction is committed or dropped.
#[derive(Clone)]
pub struct MemorySeatStore {
    inner: Arc<Inner>,
}

impl Default for MemorySeatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySeatStore {
    pub fn new() -> Self {
        Self::with_row_lock_timeout(DEFAULT_ROW_LOCK_TIMEOUT)
    }

    pub fn with_row_lock_timeout(row_lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                row_locks: Mutex::new(HashMap::new()),
                row_lock_timeout,
            }),
        }
    }

    /// Add an empty meeting and return its id.
    pub fn add_meeting(
        &self,
        group_id: DbId,
        meeting_type: MeetingType,
        created_by: DbId,
        capacity: i32,
    ) -> DbId {
        let mut state = lock_std(&self.inner.state);
        state.next_id += 1;
        let id = state.next_id;
        state.meetings.insert(
            id,
            MeetingRow {
                seats: SeatSnapshot {
                    meeting_id: id,
                    group_id,
                    meeting_type,
                    created_by,
                    capacity,
                    join_count: 0,
                    version: 0,
                },
                deleted: false,
            },
        );
        id
    }

    /// Soft-delete a meeting, bumping its version.
    pub fn soft_delete(&self, meeting_id: DbId) -> bool {
        let mut state = lock_std(&self.inner.state);
        match state.meetings.get_mut(&meeting_id) {
            Some(row) if !row.deleted => {
                row.deleted = true;
                row.seats.version += 1;
                true
            }
            _ => false,
        }
    }

    /// Record a group membership.
    pub fn add_member(&self, group_id: DbId, user_id: DbId) {
        lock_std(&self.inner.state)
            .members
            .insert((group_id, user_id));
    }

    /// Returns `true` if a membership was removed.
    pub fn remove_member(&self, group_id: DbId, user_id: DbId) -> bool {
        lock_std(&self.inner.state)
            .members
            .remove(&(group_id, user_id))
    }

    pub fn join_count(&self, meeting_id: DbId) -> Option<i32> {
        lock_std(&self.inner.state)
            .meetings
            .get(&meeting_id)
            .map(|row| row.seats.join_count)
    }

    pub fn is_deleted(&self, meeting_id: DbId) -> bool {
        lock_std(&self.inner.state)
            .meetings
            .get(&meeting_id)
            .is_some_and(|row| row.deleted)
    }

    /// Users holding a seat, in ascending id order.
    pub fn participants(&self, meeting_id: DbId) -> Vec<DbId> {
        let state = lock_std(&self.inner.state);
        let mut users: Vec<DbId> = state
            .joins
            .iter()
            .filter(|(m, _)| *m == meeting_id)
            .map(|(_, u)| *u)
            .collect();
        users.sort_unstable();
        users
    }
}

#[async_trait]
impl SeatStore for MemorySeatStore {
    type Tx = MemorySeatTx;

    async fn begin(&self) -> Result<MemorySeatTx, CoreError> {
        Ok(MemorySeatTx {
            inner: Arc::clone(&self.inner),
            row_guards: Vec::new(),
            ops: Vec::new(),
        })
    }

    async fn meeting_type(&self, meeting_id: DbId) -> Result<Option<MeetingType>, CoreError> {
        Ok(lock_std(&self.inner.state)
            .meetings
            .get(&meeting_id)
            .filter(|row| !row.deleted)
            .map(|row| row.seats.meeting_type))
    }

    async fn joined_meetings(
        &self,
        group_id: DbId,
        user_id: DbId,
    ) -> Result<Vec<DbId>, CoreError> {
        let state = lock_std(&self.inner.state);
        let mut ids: Vec<DbId> = state
            .joins
            .iter()
            .filter(|(_, u)| *u == user_id)
            .filter(|(m, _)| {
                state
                    .meetings
                    .get(m)
                    .is_some_and(|row| !row.deleted && row.seats.group_id == group_id)
            })
            .map(|(m, _)| *m)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn prune_solo_meetings(&self, group_id: DbId, user_id: DbId) -> Result<u64, CoreError> {
        let mut state = lock_std(&self.inner.state);
        let StoreState {
            meetings, joins, ..
        } = &mut *state;

        let mut pruned = 0;
        for row in meetings.values_mut() {
            let seats = &row.seats;
            if !row.deleted
                && seats.group_id == group_id
                && seats.created_by == user_id
                && seats.join_count == 1
                && joins.contains(&(seats.meeting_id, user_id))
            {
                row.deleted = true;
                row.seats.version += 1;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

#[derive(Debug)]
enum StagedOp {
    Insert { meeting_id: DbId, user_id: DbId },
    Delete { meeting_id: DbId, user_id: DbId },
    WriteCount {
        meeting_id: DbId,
        expected_version: i64,
        join_count: i32,
    },
}

/// Transaction over a [`MemorySeatStore`].
pub struct MemorySeatTx {
    inner: Arc<Inner>,
    row_guards: Vec<OwnedMutexGuard<()>>,
    ops: Vec<StagedOp>,
}

impl MemorySeatTx {
    /// Committed membership overlaid with this transaction's staged writes.
    fn sees_joined(&self, meeting_id: DbId, user_id: DbId) -> bool {
        let mut joined = lock_std(&self.inner.state)
            .joins
            .contains(&(meeting_id, user_id));
        for op in &self.ops {
            match *op {
                StagedOp::Insert {
                    meeting_id: m,
                    user_id: u,
                } if (m, u) == (meeting_id, user_id) => joined = true,
                StagedOp::Delete {
                    meeting_id: m,
                    user_id: u,
                } if (m, u) == (meeting_id, user_id) => joined = false,
                _ => {}
            }
        }
        joined
    }
}

#[async_trait]
impl SeatTx for MemorySeatTx {
    async fn load_seats(
        &mut self,
        meeting_id: DbId,
        lock: RowLock,
    ) -> Result<Option<SeatSnapshot>, CoreError> {
        if lock == RowLock::ForUpdate {
            let mutex = keyed_mutex(&self.inner.row_locks, meeting_id);
            let guard = lock_within(mutex, self.inner.row_lock_timeout)
                .await
                .ok_or_else(|| {
                    CoreError::TooManyRequests(format!(
                        "Timed out waiting for the lock on meeting {meeting_id}"
                    ))
                })?;
            self.row_guards.push(guard);
        }

        Ok(lock_std(&self.inner.state)
            .meetings
            .get(&meeting_id)
            .filter(|row| !row.deleted)
            .map(|row| row.seats.clone()))
    }

    async fn is_joined(&mut self, meeting_id: DbId, user_id: DbId) -> Result<bool, CoreError> {
        Ok(self.sees_joined(meeting_id, user_id))
    }

    async fn holds_group_membership(
        &mut self,
        meeting_id: DbId,
        user_id: DbId,
    ) -> Result<bool, CoreError> {
        let state = lock_std(&self.inner.state);
        Ok(state
            .meetings
            .get(&meeting_id)
            .is_some_and(|row| state.members.contains(&(row.seats.group_id, user_id))))
    }

    async fn insert_join(&mut self, meeting_id: DbId, user_id: DbId) -> Result<(), CoreError> {
        self.ops.push(StagedOp::Insert {
            meeting_id,
            user_id,
        });
        Ok(())
    }

    async fn delete_join(&mut self, meeting_id: DbId, user_id: DbId) -> Result<bool, CoreError> {
        if !self.sees_joined(meeting_id, user_id) {
            return Ok(false);
        }
        self.ops.push(StagedOp::Delete {
            meeting_id,
            user_id,
        });
        Ok(true)
    }

    async fn write_join_count(
        &mut self,
        seats: &SeatSnapshot,
        join_count: i32,
    ) -> Result<(), CoreError> {
        self.ops.push(StagedOp::WriteCount {
            meeting_id: seats.meeting_id,
            expected_version: seats.version,
            join_count,
        });
        Ok(())
    }

    async fn commit(self) -> Result<(), CoreError> {
        let mut state = lock_std(&self.inner.state);
        let mut next = state.clone();

        for op in &self.ops {
            match *op {
                StagedOp::Insert {
                    meeting_id,
                    user_id,
                } => {
                    if !next.joins.insert((meeting_id, user_id)) {
                        return Err(CoreError::AlreadyJoined {
                            meeting_id,
                            user_id,
                        });
                    }
                }
                StagedOp::Delete {
                    meeting_id,
                    user_id,
                } => {
                    next.joins.remove(&(meeting_id, user_id));
                }
                StagedOp::WriteCount {
                    meeting_id,
                    expected_version,
                    join_count,
                } => {
                    let row = next
                        .meetings
                        .get_mut(&meeting_id)
                        .filter(|row| !row.deleted && row.seats.version == expected_version)
                        .ok_or(CoreError::OptimisticConflict {
                            entity: "Meeting",
                            id: meeting_id,
                        })?;
                    if join_count < 0 || join_count > row.seats.capacity {
                        return Err(CoreError::Internal(format!(
                            "join_count {join_count} out of range for meeting {meeting_id}"
                        )));
                    }
                    row.seats.join_count = join_count;
                    row.seats.version += 1;
                }
            }
        }

        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_zero_timeout_acquire_fails_immediately_when_held() {
        let lock = MemoryNamedLock::new();
        assert!(lock.acquire("meeting42", Duration::ZERO).await.unwrap());
        assert!(!lock.acquire("meeting42", Duration::ZERO).await.unwrap());
        assert!(lock.acquire("meeting43", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_of_unheld_key_is_a_noop() {
        let lock = MemoryNamedLock::new();
        assert!(!lock.release("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let lock = Arc::new(MemoryNamedLock::new());
        assert!(lock.acquire("k", Duration::ZERO).await.unwrap());

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire("k", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        assert!(lock.release("k").await.unwrap());

        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_tx_leaves_no_trace() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Regular, 1, 3);

        let mut tx = store.begin().await.unwrap();
        let seats = tx.load_seats(id, RowLock::ForUpdate).await.unwrap().unwrap();
        tx.insert_join(id, 5).await.unwrap();
        assert!(tx.is_joined(id, 5).await.unwrap());
        tx.write_join_count(&seats, 1).await.unwrap();
        drop(tx);

        assert_eq!(store.join_count(id), Some(0));
        assert!(store.participants(id).is_empty());
        // The row lock went with the transaction.
        let mut tx = store.begin().await.unwrap();
        assert!(tx.load_seats(id, RowLock::ForUpdate).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 1, 3);

        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        let seats_a = a.load_seats(id, RowLock::None).await.unwrap().unwrap();
        let seats_b = b.load_seats(id, RowLock::None).await.unwrap().unwrap();

        a.insert_join(id, 1).await.unwrap();
        a.write_join_count(&seats_a, 1).await.unwrap();
        a.commit().await.unwrap();

        b.insert_join(id, 2).await.unwrap();
        b.write_join_count(&seats_b, 1).await.unwrap();
        assert_matches!(b.commit().await, Err(CoreError::OptimisticConflict { .. }));

        assert_eq!(store.participants(id), vec![1]);
    }

    #[tokio::test]
    async fn test_counter_above_capacity_is_refused_at_commit() {
        let store = MemorySeatStore::new();
        let id = store.add_meeting(1, MeetingType::Flash, 1, 1);

        let mut tx = store.begin().await.unwrap();
        let seats = tx.load_seats(id, RowLock::None).await.unwrap().unwrap();
        tx.write_join_count(&seats, 2).await.unwrap();
        assert_matches!(tx.commit().await, Err(CoreError::Internal(_)));
    }
}
