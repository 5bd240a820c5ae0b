//! Sync data models: wire frames, sync requests, and stored snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, SyncError};

/// Client platform a device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Web,
    Mobile,
    Desktop,
    Email,
}

impl Platform {
    /// Convert the platform to its wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "WEB",
            Self::Mobile => "MOBILE",
            Self::Desktop => "DESKTOP",
            Self::Email => "EMAIL",
        }
    }
}

/// Kind of sync exchange a device asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    Full,
    Partial,
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// A sync request received from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Generated server-side when the client leaves it out.
    #[serde(default = "new_request_id")]
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub device_id: String,
    /// Only meaningful for PARTIAL, where it must be non-empty.
    #[serde(default)]
    pub notification_ids: Vec<String>,
    pub sync_timestamp: i64,
    pub sync_type: SyncType,
}

impl SyncRequest {
    /// Build a FULL request with a fresh request id.
    pub fn full(user_id: &str, device_id: &str, platform: Platform, sync_timestamp: i64) -> Self {
        Self {
            id: new_request_id(),
            user_id: user_id.to_string(),
            platform,
            device_id: device_id.to_string(),
            notification_ids: Vec::new(),
            sync_timestamp,
            sync_type: SyncType::Full,
        }
    }

    /// Build a PARTIAL request for the given notification ids.
    pub fn partial(
        user_id: &str,
        device_id: &str,
        platform: Platform,
        sync_timestamp: i64,
        notification_ids: Vec<String>,
    ) -> Self {
        Self {
            notification_ids,
            sync_type: SyncType::Partial,
            ..Self::full(user_id, device_id, platform, sync_timestamp)
        }
    }

    /// Reject requests that are structurally unusable.
    pub fn validate(&self) -> Result<()> {
        require_identity(&self.user_id, &self.device_id)?;
        if self.sync_type == SyncType::Partial && self.notification_ids.is_empty() {
            return Err(SyncError::InvalidRequest(
                "PARTIAL sync requires at least one notification id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read acknowledgement for a set of notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: String,
    pub device_id: String,
    pub notification_ids: Vec<String>,
}

impl MarkReadRequest {
    pub fn validate(&self) -> Result<()> {
        require_identity(&self.user_id, &self.device_id)?;
        if self.notification_ids.is_empty() {
            return Err(SyncError::InvalidRequest(
                "MARK_READ requires at least one notification id".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_identity(user_id: &str, device_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(SyncError::InvalidRequest("userId is required".to_string()));
    }
    if device_id.trim().is_empty() {
        return Err(SyncError::InvalidRequest("deviceId is required".to_string()));
    }
    Ok(())
}

/// Frames a device may send over its persistent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SyncRequest(SyncRequest),
    MarkRead(MarkReadRequest),
    Ping,
}

impl ClientMessage {
    /// Parse and validate an inbound text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(text)
            .map_err(|e| SyncError::InvalidRequest(format!("Malformed frame: {}", e)))?;
        match &message {
            Self::SyncRequest(req) => req.validate()?,
            Self::MarkRead(req) => req.validate()?,
            Self::Ping => {}
        }
        Ok(message)
    }

    /// The `(user_id, device_id)` pair named by the frame, if any.
    pub fn identity(&self) -> Option<(&str, &str)> {
        match self {
            Self::SyncRequest(req) => Some((&req.user_id, &req.device_id)),
            Self::MarkRead(req) => Some((&req.user_id, &req.device_id)),
            Self::Ping => None,
        }
    }

    /// Request id to echo back in an error result.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::SyncRequest(req) => Some(&req.id),
            _ => None,
        }
    }
}

/// Outcome reported in a `SYNC_RESULT` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncResultStatus {
    Success,
    Error,
}

/// Frames the server pushes to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    SyncResult {
        status: SyncResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification_count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NotificationsRead {
        notification_ids: Vec<String>,
    },
    Pong,
}

impl ServerMessage {
    pub fn sync_success(request_id: Option<String>, notification_count: usize) -> Self {
        Self::SyncResult {
            status: SyncResultStatus::Success,
            request_id,
            notification_count: Some(notification_count),
            error: None,
        }
    }

    pub fn sync_error(request_id: Option<String>, error: impl Into<String>) -> Self {
        Self::SyncResult {
            status: SyncResultStatus::Error,
            request_id,
            notification_count: None,
            error: Some(error.into()),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Projection of a notification read from the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Lightweight entry kept in a device's sync snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<&NotificationSummary> for SyncSummary {
    fn from(n: &NotificationSummary) -> Self {
        Self {
            id: n.id.clone(),
            title: n.title.clone(),
            created_at: n.created_at,
        }
    }
}

/// What a given device was last told about a user's notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub sync_timestamp: i64,
    pub platform: Platform,
    pub notifications: Vec<SyncSummary>,
}
