//! Meeting seat rules: meeting types, the concurrency strategy each type
//! uses, lock keys, and the join/leave state machine over seat counters.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// How long a named lock acquisition waits before giving up.
pub const DEFAULT_NAMED_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a `SELECT ... FOR UPDATE` waits for a contended meeting row.
pub const DEFAULT_ROW_LOCK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Largest capacity a meeting may be created with.
pub const MAX_MEETING_CAPACITY: i32 = 300;

// ---------------------------------------------------------------------------
// Meeting type and strategy dispatch
// ---------------------------------------------------------------------------

/// Meeting type. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingType {
    /// Recurring meeting created by the group owner. Seats open all at once,
    /// so every member races for them simultaneously.
    Regular,
    /// Ad-hoc meeting any member may create; joined organically.
    Flash,
}

impl MeetingType {
    /// Column value stored in `meetings.meeting_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            MeetingType::Regular => "REGULAR",
            MeetingType::Flash => "FLASH",
        }
    }
}

impl fmt::Display for MeetingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(MeetingType::Regular),
            "FLASH" => Ok(MeetingType::Flash),
            other => Err(CoreError::Validation(format!(
                "Invalid meeting_type '{other}'. Must be one of: REGULAR, FLASH"
            ))),
        }
    }
}

impl TryFrom<String> for MeetingType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The concurrency control applied to a meeting's seat counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyStrategy {
    /// Lock the meeting row with `SELECT ... FOR UPDATE` for the length of
    /// the transaction.
    RowLock,
    /// Serialize through the named lock `meeting{id}`, then run a plain
    /// transaction.
    NamedLock,
    /// No lock; a versioned write detects conflicts and the operation is
    /// retried with a fixed backoff.
    OptimisticRetry,
}

impl FromStr for ConcurrencyStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "row_lock" => Ok(ConcurrencyStrategy::RowLock),
            "named_lock" => Ok(ConcurrencyStrategy::NamedLock),
            "optimistic" | "optimistic_retry" => Ok(ConcurrencyStrategy::OptimisticRetry),
            other => Err(CoreError::Validation(format!(
                "Invalid concurrency strategy '{other}'"
            ))),
        }
    }
}

/// Which strategy guards each meeting type.
///
/// This is the only place the mapping lives. Every join and leave for a
/// meeting resolves through it, and since a meeting's type never changes,
/// a meeting is guarded by one primitive for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyTable {
    /// Strategy for flash meetings: `NamedLock` unless the legacy
    /// optimistic path is configured.
    pub flash: ConcurrencyStrategy,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            flash: ConcurrencyStrategy::NamedLock,
        }
    }
}

impl StrategyTable {
    pub fn strategy_for(&self, meeting_type: MeetingType) -> ConcurrencyStrategy {
        match meeting_type {
            MeetingType::Regular => ConcurrencyStrategy::RowLock,
            MeetingType::Flash => self.flash,
        }
    }
}

// ---------------------------------------------------------------------------
// Lock keys
// ---------------------------------------------------------------------------

/// Named lock key serializing seat changes of a flash meeting.
pub fn meeting_lock_key(meeting_id: DbId) -> String {
    format!("meeting{meeting_id}")
}

/// Named lock key serializing membership changes of a group.
pub fn group_lock_key(group_id: DbId) -> String {
    format!("group{group_id}")
}

// ---------------------------------------------------------------------------
// Seat state machine
// ---------------------------------------------------------------------------

/// Seat-related columns of a live meeting row, as read inside the
/// critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSnapshot {
    pub meeting_id: DbId,
    pub group_id: DbId,
    pub meeting_type: MeetingType,
    pub created_by: DbId,
    pub capacity: i32,
    pub join_count: i32,
    pub version: i64,
}

/// Per-user seat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinState {
    NotJoined,
    Joined,
}

impl From<bool> for JoinState {
    fn from(joined: bool) -> Self {
        if joined {
            JoinState::Joined
        } else {
            JoinState::NotJoined
        }
    }
}

/// A requested seat transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatTransition {
    Join,
    Leave,
}

impl SeatSnapshot {
    pub fn remaining_seats(&self) -> i32 {
        (self.capacity - self.join_count).max(0)
    }

    /// Validate `transition` for `user_id` in `state` and return the new
    /// `join_count`.
    ///
    /// Joining requires a free seat and no existing join record; leaving
    /// requires a join record. The decremented count never goes below zero.
    pub fn apply(
        &self,
        transition: SeatTransition,
        user_id: DbId,
        state: JoinState,
    ) -> Result<i32, CoreError> {
        match (transition, state) {
            (SeatTransition::Join, JoinState::Joined) => Err(CoreError::AlreadyJoined {
                meeting_id: self.meeting_id,
                user_id,
            }),
            (SeatTransition::Join, JoinState::NotJoined) => {
                if self.join_count >= self.capacity {
                    return Err(CoreError::MeetingFull {
                        meeting_id: self.meeting_id,
                        capacity: self.capacity,
                    });
                }
                Ok(self.join_count + 1)
            }
            (SeatTransition::Leave, JoinState::NotJoined) => Err(CoreError::NotJoined {
                meeting_id: self.meeting_id,
                user_id,
            }),
            (SeatTransition::Leave, JoinState::Joined) => Ok((self.join_count - 1).max(0)),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Validate a requested meeting capacity.
pub fn validate_capacity(capacity: i32) -> Result<(), String> {
    if capacity < 1 {
        return Err(format!("capacity must be at least 1, got {capacity}"));
    }
    if capacity > MAX_MEETING_CAPACITY {
        return Err(format!(
            "capacity must be at most {MAX_MEETING_CAPACITY}, got {capacity}"
        ));
    }
    Ok(())
}

/// Check who may create a meeting of the given type: regular meetings are
/// reserved to the group owner, flash meetings to any member.
pub fn ensure_can_create(
    meeting_type: MeetingType,
    is_owner: bool,
    is_member: bool,
) -> Result<(), CoreError> {
    match meeting_type {
        MeetingType::Regular if !is_owner => Err(CoreError::Forbidden(
            "Only the group owner can create regular meetings".into(),
        )),
        MeetingType::Flash if !is_member => Err(CoreError::Forbidden(
            "Only group members can create flash meetings".into(),
        )),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
