//! Group and membership models and DTOs.

use meetup_core::group::{validate_group_capacity, GroupSeats};
use meetup_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

/// A row from the `groups` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Group {
    pub id: DbId,
    pub name: String,
    pub owner_id: DbId,
    pub capacity: i32,
    pub member_count: i32,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Group {
    pub fn seats(&self) -> GroupSeats {
        GroupSeats {
            group_id: self.id,
            owner_id: self.owner_id,
            capacity: self.capacity,
            member_count: self.member_count,
        }
    }
}

/// DTO for creating a group via `POST /api/v1/groups`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGroup {
    #[validate(length(min = 1, max = 50, message = "name must be 1-50 characters"))]
    pub name: String,
    #[validate(custom(function = "validate_capacity_field"))]
    pub capacity: i32,
}

fn validate_capacity_field(capacity: i32) -> Result<(), ValidationError> {
    validate_group_capacity(capacity).map_err(|msg| {
        let mut err = ValidationError::new("capacity");
        err.message = Some(msg.into());
        err
    })
}

/// A row from the `user_groups` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GroupMember {
    pub group_id: DbId,
    pub user_id: DbId,
    pub joined_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(capacity: i32) -> CreateGroup {
        CreateGroup {
            name: "Chess club".into(),
            capacity,
        }
    }

    #[test]
    fn test_capacity_within_range_passes() {
        assert!(input(10).validate().is_ok());
    }

    #[test]
    fn test_capacity_out_of_range_rejected() {
        for capacity in [0, -3, i32::MAX] {
            let errors = input(capacity).validate().unwrap_err();
            assert!(errors.field_errors().contains_key("capacity"));
        }
    }
}
