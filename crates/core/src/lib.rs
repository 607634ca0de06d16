//! Domain core of the meetup backend: error taxonomy, meeting seat rules,
//! named-lock and optimistic-retry combinators, and the seat reservation
//! engine. Free of any database or HTTP dependency.

pub mod error;
pub mod group;
pub mod locking;
pub mod meeting;
pub mod memory;
pub mod reservation;
pub mod retry;
pub mod types;
