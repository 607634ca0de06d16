//! Repository layer: one zero-sized struct per table family, each exposing
//! async functions over a pool or an explicit connection.

pub mod advisory_lock_repo;
pub mod group_repo;
pub mod meeting_repo;
pub mod user_meeting_repo;

pub use advisory_lock_repo::AdvisoryLockRepo;
pub use group_repo::GroupRepo;
pub use meeting_repo::MeetingRepo;
pub use user_meeting_repo::UserMeetingRepo;
