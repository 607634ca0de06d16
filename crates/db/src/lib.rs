//! PostgreSQL persistence for the meetup backend: connection pools,
//! row models, repositories, and the database-backed implementations of
//! the core [`DistributedLock`](meetup_core::locking::DistributedLock) and
//! [`SeatStore`](meetup_core::reservation::SeatStore) capabilities.

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod locks;
pub mod models;
pub mod repositories;
pub mod seat_store;

pub use locks::PgNamedLock;
pub use seat_store::PgSeatStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
