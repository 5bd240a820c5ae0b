//! Periodic cleanup and validation of sync state.

use crate::config::SyncSettings;
use crate::notifications::NotificationStore;
use crate::storage::sync_state::KEY_PREFIX;
use crate::storage::SyncStateStore;
use crate::{Result, SyncError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub notifications_deleted: usize,
    pub expired_states_purged: usize,
    pub stale_states_deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub scanned: usize,
    pub removed: usize,
}

pub struct Maintenance {
    notifications: Arc<dyn NotificationStore>,
    states: SyncStateStore,
    settings: SyncSettings,
}

impl Maintenance {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        states: SyncStateStore,
        settings: SyncSettings,
    ) -> Self {
        Self {
            notifications,
            states,
            settings,
        }
    }

    /// Delete old read notifications, then drop sync state that is expired
    /// or stale. With `clear_all_sync_state` every sync-state key is wiped.
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let notifications_deleted = self
            .notifications
            .delete_older_than(self.settings.read_retention_days, true)
            .await?;

        let expired_states_purged = self.states.purge_expired().await?;

        let stale_states_deleted = if self.settings.clear_all_sync_state {
            self.states.delete_all(KEY_PREFIX).await?
        } else {
            self.run_validation().await?.removed
        };

        let report = CleanupReport {
            notifications_deleted,
            expired_states_purged,
            stale_states_deleted,
        };
        info!(
            notifications_deleted = report.notifications_deleted,
            expired_states_purged = report.expired_states_purged,
            stale_states_deleted = report.stale_states_deleted,
            "Cleanup completed"
        );
        Ok(report)
    }

    /// Remove every sync-state record whose `sync_timestamp` is older than
    /// the staleness window. Unreadable records are removed as well.
    pub async fn run_validation(&self) -> Result<ValidationReport> {
        let window_ms = i64::try_from(self.settings.stale_after.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(window_ms);
        let mut report = ValidationReport::default();

        for key in self.states.keys().await? {
            report.scanned += 1;
            let stale = match self.states.get_by_key(&key).await {
                Ok(Some(state)) => state.sync_timestamp < cutoff,
                // Expired between listing and loading.
                Ok(None) => false,
                Err(SyncError::Serialization(e)) => {
                    warn!(key = %key, error = %e, "Unreadable sync state");
                    true
                }
                Err(e) => return Err(e),
            };

            if stale && self.states.delete(&key).await? {
                debug!(key = %key, "Removed stale sync state");
                report.removed += 1;
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            "Sync state validation completed"
        );
        Ok(report)
    }
}
