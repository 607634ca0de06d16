//! Meeting and seat-record models and DTOs.

use meetup_core::meeting::{validate_capacity, MeetingType, SeatSnapshot};
use meetup_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

// ---------------------------------------------------------------------------
// Meeting
// ---------------------------------------------------------------------------

/// A row from the `meetings` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Meeting {
    pub id: DbId,
    pub group_id: DbId,
    #[sqlx(try_from = "String")]
    pub meeting_type: MeetingType,
    pub title: String,
    pub place: Option<String>,
    pub cost: i32,
    pub starts_at: Timestamp,
    pub capacity: i32,
    pub join_count: i32,
    pub created_by: DbId,
    pub version: i64,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Meeting {
    /// Seat columns as the reservation engine sees them.
    pub fn seats(&self) -> SeatSnapshot {
        SeatSnapshot {
            meeting_id: self.id,
            group_id: self.group_id,
            meeting_type: self.meeting_type,
            created_by: self.created_by,
            capacity: self.capacity,
            join_count: self.join_count,
            version: self.version,
        }
    }
}

/// DTO for creating a meeting via `POST /api/v1/groups/{id}/meetings`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateMeeting {
    pub meeting_type: MeetingType,
    #[validate(length(min = 1, max = 100, message = "title must be 1-100 characters"))]
    pub title: String,
    #[validate(length(max = 200, message = "place must be at most 200 characters"))]
    pub place: Option<String>,
    #[validate(range(min = 0, message = "cost cannot be negative"))]
    pub cost: Option<i32>,
    #[validate(custom(function = "validate_starts_at"))]
    pub starts_at: Timestamp,
    #[validate(custom(function = "validate_capacity_field"))]
    pub capacity: i32,
}

fn validate_starts_at(starts_at: &Timestamp) -> Result<(), ValidationError> {
    if *starts_at <= chrono::Utc::now() {
        let mut err = ValidationError::new("starts_at_in_past");
        err.message = Some("starts_at must be in the future".into());
        return Err(err);
    }
    Ok(())
}

fn validate_capacity_field(capacity: i32) -> Result<(), ValidationError> {
    validate_capacity(capacity).map_err(|msg| {
        let mut err = ValidationError::new("capacity");
        err.message = Some(msg.into());
        err
    })
}

// ---------------------------------------------------------------------------
// UserMeeting
// ---------------------------------------------------------------------------

/// A row from the `user_meetings` table: one seated user.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MeetingParticipant {
    pub meeting_id: DbId,
    pub user_id: DbId,
    pub joined_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn input(capacity: i32, starts_in_hours: i64) -> CreateMeeting {
        CreateMeeting {
            meeting_type: MeetingType::Flash,
            title: "Board games".into(),
            place: Some("Cafe".into()),
            cost: Some(0),
            starts_at: Utc::now() + Duration::hours(starts_in_hours),
            capacity,
        }
    }

    #[test]
    fn test_valid_meeting_passes() {
        assert!(input(10, 2).validate().is_ok());
    }

    #[test]
    fn test_past_start_rejected() {
        let errors = input(10, -1).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("starts_at"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let errors = input(0, 2).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("capacity"));
    }

    #[test]
    fn test_empty_title_rejected() {
        let mut m = input(5, 2);
        m.title = String::new();
        assert!(m.validate().is_err());
    }
}
