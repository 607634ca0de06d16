//! Periodic soft delete of meetings whose start time has passed.
//!
//! Expired meetings stop accepting seat changes: the delete bumps their
//! version, and every seat path only reads live rows.

use std::time::Duration;

use meetup_db::repositories::MeetingRepo;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Run one sweep. Returns the number of meetings removed.
pub async fn sweep_once(pool: &PgPool) -> Result<u64, sqlx::Error> {
    MeetingRepo::soft_delete_expired(pool).await
}

/// Run the sweep loop every `interval` until `cancel` is triggered.
pub async fn run(pool: PgPool, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Expired meeting sweep started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Expired meeting sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match sweep_once(&pool).await {
                    Ok(deleted) => {
                        if deleted > 0 {
                            tracing::info!(deleted, "Meeting sweep: removed expired meetings");
                        } else {
                            tracing::debug!("Meeting sweep: nothing expired");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Meeting sweep failed");
                    }
                }
            }
        }
    }
}
