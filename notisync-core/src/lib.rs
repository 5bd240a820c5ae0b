//! Notification Synchronization Core
//!
//! Keeps a user's unread/read notification state consistent across every
//! device that is connected at the same time:
//! - Connection registry indexed by device and by user
//! - FULL / PARTIAL sync exchanges against an external notification store
//! - Per-(user, device) sync snapshots in a key-value store with TTL
//! - Read acknowledgements broadcast to all of a user's devices
//! - Periodic cleanup and staleness validation

pub mod config;
pub mod maintenance;
pub mod models;
pub mod notifications;
pub mod protocol;
pub mod registry;
pub mod storage;

pub use config::{MissingStatePolicy, SyncSettings};
pub use maintenance::{CleanupReport, Maintenance, ValidationReport};
pub use models::{
    ClientMessage, NotificationSummary, Platform, ServerMessage, SyncRequest, SyncResultStatus,
    SyncState, SyncSummary, SyncType,
};
pub use notifications::{NotificationStore, SqliteNotificationStore};
pub use protocol::{SyncOutcome, SyncPhase, SyncService};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use storage::{Database, KeyValueStore, MemoryKvStore, SqliteKvStore, SyncStateStore};

use thiserror::Error;

/// Result type for sync core operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// General error type for sync core operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection is bound to {bound}, frame names {requested}")]
    IdentityMismatch { bound: String, requested: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
