//! Group membership rules.
//!
//! Membership changes of a group are serialized through the named lock
//! `group{id}` (see [`crate::meeting::group_lock_key`]); these checks run
//! inside that critical section.

use crate::error::CoreError;
use crate::types::DbId;

/// Largest capacity a group may be created with.
pub const MAX_GROUP_CAPACITY: i32 = 1000;

/// Membership columns of a live group row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSeats {
    pub group_id: DbId,
    pub owner_id: DbId,
    pub capacity: i32,
    pub member_count: i32,
}

impl GroupSeats {
    /// New `member_count` after `user_id` joins.
    pub fn join(&self, user_id: DbId, is_member: bool) -> Result<i32, CoreError> {
        if is_member {
            return Err(CoreError::AlreadyMember {
                group_id: self.group_id,
                user_id,
            });
        }
        if self.member_count >= self.capacity {
            return Err(CoreError::GroupFull {
                group_id: self.group_id,
                capacity: self.capacity,
            });
        }
        Ok(self.member_count + 1)
    }

    /// New `member_count` after `user_id` leaves. The owner cannot leave
    /// their own group.
    pub fn leave(&self, user_id: DbId, is_member: bool) -> Result<i32, CoreError> {
        if user_id == self.owner_id {
            return Err(CoreError::Forbidden(
                "The group owner cannot leave the group".into(),
            ));
        }
        if !is_member {
            return Err(CoreError::NotMember {
                group_id: self.group_id,
                user_id,
            });
        }
        Ok((self.member_count - 1).max(0))
    }
}

/// Validate a requested group capacity.
pub fn validate_group_capacity(capacity: i32) -> Result<(), String> {
    if !(1..=MAX_GROUP_CAPACITY).contains(&capacity) {
        return Err(format!(
            "capacity must be between 1 and {MAX_GROUP_CAPACITY}, got {capacity}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn group(capacity: i32, member_count: i32) -> GroupSeats {
        GroupSeats {
            group_id: 3,
            owner_id: 1,
            capacity,
            member_count,
        }
    }

    #[test]
    fn test_join_with_room() {
        assert_eq!(group(10, 4).join(7, false).unwrap(), 5);
    }

    #[test]
    fn test_join_full_group() {
        assert_matches!(
            group(2, 2).join(7, false),
            Err(CoreError::GroupFull {
                group_id: 3,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_join_twice() {
        assert_matches!(
            group(10, 4).join(7, true),
            Err(CoreError::AlreadyMember { user_id: 7, .. })
        );
    }

    #[test]
    fn test_owner_cannot_leave() {
        assert_matches!(group(10, 4).leave(1, true), Err(CoreError::Forbidden(_)));
    }

    #[test]
    fn test_leave_requires_membership() {
        assert_matches!(
            group(10, 4).leave(7, false),
            Err(CoreError::NotMember { .. })
        );
        assert_eq!(group(10, 4).leave(7, true).unwrap(), 3);
    }

    #[test]
    fn test_group_capacity_bounds() {
        assert!(validate_group_capacity(1).is_ok());
        assert!(validate_group_capacity(0).is_err());
        assert!(validate_group_capacity(MAX_GROUP_CAPACITY + 1).is_err());
    }
}
