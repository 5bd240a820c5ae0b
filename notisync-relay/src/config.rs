//! Relay server configuration.

use notisync_core::{MissingStatePolicy, SyncSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Value of `storage_path` that keeps everything in process memory.
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    pub sync_state_ttl_secs: u64,
    pub full_sync_limit: usize,
    pub store_timeout_ms: u64,
    pub stale_sync_state_secs: u64,
    pub read_retention_days: u32,
    pub cleanup_interval_secs: u64,
    pub validation_interval_secs: u64,
    pub missing_state_policy: MissingStatePolicy,
    pub clear_all_sync_state: bool,
    pub max_message_size: usize,
    pub rate_limit_per_minute: u32,
    pub outbound_queue_capacity: usize,
    pub max_payload_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8750".to_string(),
            storage_path: PathBuf::from("notisync.db"),
            sync_state_ttl_secs: 86_400,
            full_sync_limit: 100,
            store_timeout_ms: 5_000,
            stale_sync_state_secs: 172_800,
            read_retention_days: 30,
            cleanup_interval_secs: 86_400,
            validation_interval_secs: 3_600,
            missing_state_policy: MissingStatePolicy::Create,
            clear_all_sync_state: false,
            max_message_size: 65_536,
            rate_limit_per_minute: 120,
            outbound_queue_capacity: 256,
            max_payload_size: 65_536,
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    pub fn is_in_memory(&self) -> bool {
        self.storage_path.as_os_str() == IN_MEMORY
    }

    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            sync_state_ttl: Duration::from_secs(self.sync_state_ttl_secs),
            full_sync_limit: self.full_sync_limit,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            stale_after: Duration::from_secs(self.stale_sync_state_secs),
            read_retention_days: self.read_retention_days,
            missing_state_policy: self.missing_state_policy,
            clear_all_sync_state: self.clear_all_sync_state,
        }
    }
}
