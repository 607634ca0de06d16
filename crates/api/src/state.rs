use std::sync::Arc;

use meetup_core::reservation::ReservationEngine;
use meetup_db::{PgNamedLock, PgSeatStore};

use crate::config::ServerConfig;

/// The reservation engine as wired in production.
pub type Engine = ReservationEngine<PgSeatStore, Arc<PgNamedLock>>;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: meetup_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Seat reservation engine (meeting joins and leaves).
    pub engine: Arc<Engine>,
    /// Named lock, shared with the engine, used for group membership.
    pub named_lock: Arc<PgNamedLock>,
}

impl AppState {
    /// Wire the engine and named lock from the two pools.
    ///
    /// `lock_pool` must be distinct from `pool`: named-lock waiters park on
    /// its connections.
    pub fn new(
        pool: meetup_db::DbPool,
        lock_pool: meetup_db::DbPool,
        config: ServerConfig,
    ) -> Self {
        let named_lock = Arc::new(PgNamedLock::new(lock_pool));
        let store = PgSeatStore::new(pool.clone(), config.reservation.row_lock_timeout);
        let engine = ReservationEngine::new(
            store,
            Arc::clone(&named_lock),
            config.reservation.policy(),
        );

        Self {
            pool,
            config: Arc::new(config),
            engine: Arc::new(engine),
            named_lock,
        }
    }
}
