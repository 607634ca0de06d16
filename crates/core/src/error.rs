use crate::locking::LockError;
use crate::types::DbId;

/// Domain errors shared by the reservation engine, the repositories and
/// the HTTP layer.
///
/// Business outcomes (`MeetingFull`, `NotJoined`, ...) are ordinary results
/// of a request and are never logged as failures. Only `Lock` and `Internal`
/// represent faults of the system itself.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A lock could not be obtained within its wait budget. Retryable.
    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// A versioned write lost the race against a concurrent writer.
    #[error("Concurrent modification of {entity} {id}")]
    OptimisticConflict { entity: &'static str, id: DbId },

    #[error("Meeting {meeting_id} is full ({capacity} seats)")]
    MeetingFull { meeting_id: DbId, capacity: i32 },

    #[error("User {user_id} already joined meeting {meeting_id}")]
    AlreadyJoined { meeting_id: DbId, user_id: DbId },

    #[error("User {user_id} has not joined meeting {meeting_id}")]
    NotJoined { meeting_id: DbId, user_id: DbId },

    #[error("Group {group_id} is full ({capacity} members)")]
    GroupFull { group_id: DbId, capacity: i32 },

    #[error("User {user_id} is already a member of group {group_id}")]
    AlreadyMember { group_id: DbId, user_id: DbId },

    #[error("User {user_id} is not a member of group {group_id}")]
    NotMember { group_id: DbId, user_id: DbId },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing or soft-deleted meeting.
    pub fn meeting_not_found(id: DbId) -> Self {
        CoreError::NotFound {
            entity: "Meeting",
            id,
        }
    }

    /// Shorthand for a missing or soft-deleted group.
    pub fn group_not_found(id: DbId) -> Self {
        CoreError::NotFound { entity: "Group", id }
    }

    /// Returns `true` for contention signals a client (or the optimistic
    /// retry loop) may retry: lock timeouts and version conflicts.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            CoreError::TooManyRequests(_) | CoreError::OptimisticConflict { .. }
        )
    }
}
