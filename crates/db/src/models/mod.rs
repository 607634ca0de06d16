pub mod group;
pub mod meeting;
