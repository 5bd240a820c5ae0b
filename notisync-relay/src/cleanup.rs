//! Background maintenance: periodic cleanup and sync-state validation.

use notisync_core::Maintenance;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// Spawn the cleanup and validation jobs, each on its own interval.
pub fn spawn_maintenance_tasks(
    maintenance: Arc<Maintenance>,
    cleanup_every: Duration,
    validate_every: Duration,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let cleanup = {
        let maintenance = maintenance.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(cleanup_every);
            loop {
                interval.tick().await;
                if let Err(e) = maintenance.run_cleanup().await {
                    tracing::error!("Cleanup error: {}", e);
                }
            }
        })
    };

    let validation = tokio::spawn(async move {
        let mut interval = time::interval(validate_every);
        // The first tick fires immediately; cleanup already covers startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = maintenance.run_validation().await {
                tracing::error!("Sync state validation error: {}", e);
            }
        }
    });

    (cleanup, validation)
}
