//! Runtime settings for the sync core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime of a sync-state record after its last write.
pub const DEFAULT_SYNC_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on notifications returned by a FULL sync.
pub const DEFAULT_FULL_SYNC_LIMIT: usize = 100;

/// Sync state older than this is removed by the validation job.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(48 * 60 * 60);

/// Read notifications older than this many days are removed by cleanup.
pub const DEFAULT_READ_RETENTION_DAYS: u32 = 30;

/// What a PARTIAL sync does when the device has no stored sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStatePolicy {
    /// Start a new record holding only the partial summaries.
    #[default]
    Create,
    /// Leave the store untouched.
    Skip,
}

/// Settings shared by the protocol handler and the maintenance jobs.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sync_state_ttl: Duration,
    pub full_sync_limit: usize,
    pub store_timeout: Duration,
    pub stale_after: Duration,
    pub read_retention_days: u32,
    pub missing_state_policy: MissingStatePolicy,
    /// Wipe every sync-state key during cleanup instead of only stale ones.
    pub clear_all_sync_state: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_state_ttl: DEFAULT_SYNC_STATE_TTL,
            full_sync_limit: DEFAULT_FULL_SYNC_LIMIT,
            store_timeout: Duration::from_secs(5),
            stale_after: DEFAULT_STALE_AFTER,
            read_retention_days: DEFAULT_READ_RETENTION_DAYS,
            missing_state_policy: MissingStatePolicy::Create,
            clear_all_sync_state: false,
        }
    }
}
