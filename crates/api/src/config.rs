use std::time::Duration;

use meetup_core::meeting::{
    ConcurrencyStrategy, StrategyTable, DEFAULT_NAMED_LOCK_TIMEOUT, DEFAULT_ROW_LOCK_TIMEOUT,
};
use meetup_core::reservation::ReservationPolicy;
use meetup_core::retry::{RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Size of the pool serving queries and seat transactions (default: `20`).
    pub database_pool_size: u32,
    /// Size of the pool dedicated to named-lock sessions (default: `20`).
    pub lock_pool_size: u32,
    /// Seat reservation tunables.
    pub reservation: ReservationConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `3000`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                       |
    /// | `DATABASE_POOL_SIZE`      | `20`                       |
    /// | `DATABASE_LOCK_POOL_SIZE` | `20`                       |
    ///
    /// plus the variables read by [`ReservationConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let database_pool_size: u32 = std::env::var("DATABASE_POOL_SIZE")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .expect("DATABASE_POOL_SIZE must be a valid u32");

        let lock_pool_size: u32 = std::env::var("DATABASE_LOCK_POOL_SIZE")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .expect("DATABASE_LOCK_POOL_SIZE must be a valid u32");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_pool_size,
            lock_pool_size,
            reservation: ReservationConfig::from_env(),
        }
    }
}

/// Lock budgets, retry policy and strategy selection of seat reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Wait budget of the `meeting{id}` and `group{id}` named locks.
    pub named_lock_timeout: Duration,
    /// Wait budget of the `FOR UPDATE` row lock on regular meetings.
    pub row_lock_timeout: Duration,
    pub retry: RetryPolicy,
    /// Strategy guarding flash meetings.
    pub flash_strategy: ConcurrencyStrategy,
    /// Period of the expired-meeting sweep.
    pub sweep_interval: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            named_lock_timeout: DEFAULT_NAMED_LOCK_TIMEOUT,
            row_lock_timeout: DEFAULT_ROW_LOCK_TIMEOUT,
            retry: RetryPolicy::default(),
            flash_strategy: ConcurrencyStrategy::NamedLock,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl ReservationConfig {
    /// | Env Var                       | Default      |
    /// |-------------------------------|--------------|
    /// | `NAMED_LOCK_TIMEOUT_SECS`     | `3`          |
    /// | `ROW_LOCK_TIMEOUT_MS`         | `3000`       |
    /// | `OPTIMISTIC_MAX_ATTEMPTS`     | `5`          |
    /// | `OPTIMISTIC_BACKOFF_MS`       | `100`        |
    /// | `FLASH_STRATEGY`              | `named_lock` |
    /// | `MEETING_SWEEP_INTERVAL_SECS` | `300`        |
    pub fn from_env() -> Self {
        let named_lock_timeout_secs: u64 = std::env::var("NAMED_LOCK_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_NAMED_LOCK_TIMEOUT.as_secs().to_string())
            .parse()
            .expect("NAMED_LOCK_TIMEOUT_SECS must be a valid u64");

        let row_lock_timeout_ms: u64 = std::env::var("ROW_LOCK_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_ROW_LOCK_TIMEOUT.as_millis().to_string())
            .parse()
            .expect("ROW_LOCK_TIMEOUT_MS must be a valid u64");

        let max_attempts: u32 = std::env::var("OPTIMISTIC_MAX_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_MAX_ATTEMPTS.to_string())
            .parse()
            .expect("OPTIMISTIC_MAX_ATTEMPTS must be a valid u32");

        let backoff_ms: u64 = std::env::var("OPTIMISTIC_BACKOFF_MS")
            .unwrap_or_else(|_| DEFAULT_BACKOFF.as_millis().to_string())
            .parse()
            .expect("OPTIMISTIC_BACKOFF_MS must be a valid u64");

        let flash_strategy: ConcurrencyStrategy = std::env::var("FLASH_STRATEGY")
            .unwrap_or_else(|_| "named_lock".into())
            .parse()
            .unwrap_or_else(|e| panic!("FLASH_STRATEGY is invalid: {e}"));
        assert!(
            flash_strategy != ConcurrencyStrategy::RowLock,
            "FLASH_STRATEGY must be named_lock or optimistic"
        );

        let sweep_interval_secs: u64 = std::env::var("MEETING_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("MEETING_SWEEP_INTERVAL_SECS must be a valid u64");

        Self {
            named_lock_timeout: Duration::from_secs(named_lock_timeout_secs),
            row_lock_timeout: Duration::from_millis(row_lock_timeout_ms),
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(backoff_ms),
            },
            flash_strategy,
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
        }
    }

    /// The engine policy this configuration describes.
    pub fn policy(&self) -> ReservationPolicy {
        ReservationPolicy {
            strategies: StrategyTable {
                flash: self.flash_strategy,
            },
            named_lock_timeout: self.named_lock_timeout,
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_engine_defaults() {
        let policy = ReservationConfig::default().policy();
        assert_eq!(policy, ReservationPolicy::default());
        assert_eq!(policy.named_lock_timeout, Duration::from_secs(3));
        assert_eq!(policy.retry.max_attempts, 5);
        assert_eq!(policy.retry.backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_optimistic_flash_strategy_flows_into_policy() {
        let config = ReservationConfig {
            flash_strategy: ConcurrencyStrategy::OptimisticRetry,
            ..ReservationConfig::default()
        };
        assert_eq!(
            config.policy().strategies.flash,
            ConcurrencyStrategy::OptimisticRetry
        );
    }
}
