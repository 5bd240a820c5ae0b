//! Sync protocol handler: drives one FULL or PARTIAL exchange and pushes
//! read acknowledgements to every device of a user.

#[cfg(test)]
mod tests;

use crate::{
    config::SyncSettings,
    models::{ServerMessage, SyncRequest, SyncState, SyncSummary, SyncType},
    notifications::NotificationStore,
    registry::ConnectionRegistry,
    storage::SyncStateStore,
    Result, SyncError,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a sync exchange is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Received,
    Resolving(SyncType),
    Fetched,
    StateWritten,
    ResultSent,
    Failed,
}

/// What happened to one sync request.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub request_id: String,
    /// `ResultSent` on success, `Failed` otherwise.
    pub phase: SyncPhase,
    pub result: ServerMessage,
    /// False when the requesting device was no longer connected.
    pub delivered: bool,
}

/// Result of a read acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkReadOutcome {
    /// Rows updated in the notification store.
    pub updated: usize,
    /// Connections that accepted the `NOTIFICATIONS_READ` broadcast.
    pub delivered: usize,
}

/// Shared by every connection handler; holds no per-connection state.
pub struct SyncService {
    notifications: Arc<dyn NotificationStore>,
    states: SyncStateStore,
    registry: Arc<ConnectionRegistry>,
    settings: SyncSettings,
}

impl SyncService {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        states: SyncStateStore,
        registry: Arc<ConnectionRegistry>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            notifications,
            states,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn states(&self) -> &SyncStateStore {
        &self.states
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run a sync exchange and deliver its `SYNC_RESULT` to the requesting
    /// device. Errors are reported to the device, never returned.
    pub async fn handle_sync(&self, request: SyncRequest) -> SyncOutcome {
        let mut phase = SyncPhase::Received;
        debug!(
            request_id = %request.id,
            user_id = %request.user_id,
            device_id = %request.device_id,
            platform = request.platform.as_str(),
            sync_type = ?request.sync_type,
            "Sync request received"
        );

        let result = match self.run_sync(&request, &mut phase).await {
            Ok(count) => {
                phase = SyncPhase::ResultSent;
                ServerMessage::sync_success(Some(request.id.clone()), count)
            }
            Err(e) => {
                warn!(
                    request_id = %request.id,
                    device_id = %request.device_id,
                    failed_in = ?phase,
                    error = %e,
                    "Sync failed"
                );
                phase = SyncPhase::Failed;
                ServerMessage::sync_error(Some(request.id.clone()), e.to_string())
            }
        };

        let delivered = self
            .registry
            .send_to_device(&request.device_id, result.clone());
        if !delivered {
            debug!(
                request_id = %request.id,
                device_id = %request.device_id,
                "Sync result dropped, device not connected"
            );
        }

        SyncOutcome {
            request_id: request.id,
            phase,
            result,
            delivered,
        }
    }

    async fn run_sync(&self, request: &SyncRequest, phase: &mut SyncPhase) -> Result<usize> {
        *phase = SyncPhase::Resolving(request.sync_type);
        request.validate()?;

        let fetched = match request.sync_type {
            SyncType::Full => {
                self.bounded(self.notifications.list_unread(
                    &request.user_id,
                    self.settings.full_sync_limit,
                ))
                .await?
            }
            SyncType::Partial => {
                self.bounded(
                    self.notifications
                        .list_by_ids(&request.notification_ids, &request.user_id),
                )
                .await?
            }
        };
        *phase = SyncPhase::Fetched;
        debug!(request_id = %request.id, count = fetched.len(), "Fetched notifications");

        let count = fetched.len();
        let summaries: Vec<SyncSummary> = fetched.iter().map(SyncSummary::from).collect();

        match request.sync_type {
            SyncType::Full => {
                let state = SyncState {
                    sync_timestamp: request.sync_timestamp,
                    platform: request.platform,
                    notifications: summaries,
                };
                self.bounded(
                    self.states
                        .put(&request.user_id, &request.device_id, &state),
                )
                .await?;
            }
            SyncType::Partial => {
                let outcome = self
                    .bounded(self.states.merge(
                        &request.user_id,
                        &request.device_id,
                        request.platform,
                        request.sync_timestamp,
                        summaries,
                        self.settings.missing_state_policy,
                    ))
                    .await?;
                debug!(request_id = %request.id, outcome = ?outcome, "Merged sync state");
            }
        }
        *phase = SyncPhase::StateWritten;

        Ok(count)
    }

    /// Mark notifications read in the store, then tell every device of the
    /// user that is connected right now.
    pub async fn mark_read(
        &self,
        user_id: &str,
        notification_ids: &[String],
    ) -> Result<MarkReadOutcome> {
        if user_id.trim().is_empty() {
            return Err(SyncError::InvalidRequest("userId is required".to_string()));
        }
        if notification_ids.is_empty() {
            return Err(SyncError::InvalidRequest(
                "At least one notification id is required".to_string(),
            ));
        }

        let updated = self
            .bounded(
                self.notifications
                    .mark_read(notification_ids, user_id, Utc::now()),
            )
            .await?;

        let message = ServerMessage::NotificationsRead {
            notification_ids: notification_ids.to_vec(),
        };
        let delivered = self.registry.broadcast_to_user(user_id, &message);

        info!(
            user_id = %user_id,
            updated = updated,
            delivered = delivered,
            "Notifications marked read"
        );
        Ok(MarkReadOutcome { updated, delivered })
    }

    /// The stored snapshot for a device.
    pub async fn sync_state(&self, user_id: &str, device_id: &str) -> Result<SyncState> {
        self.bounded(self.states.get(user_id, device_id))
            .await?
            .ok_or_else(|| {
                SyncError::NotFound(format!("No sync state for {}/{}", user_id, device_id))
            })
    }

    /// Bound a store call by the configured timeout.
    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.settings.store_timeout;
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(limit.as_millis() as u64)),
        }
    }
}
