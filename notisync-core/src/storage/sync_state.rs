//! Per-(user, device) sync snapshots kept in a key-value store.
//!
//! This is a derived cache of the notification store and may be dropped at
//! any time. Every write refreshes the record's TTL.

use super::KeyValueStore;
use crate::config::MissingStatePolicy;
use crate::models::{Platform, SyncState, SyncSummary};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix shared by every sync-state key.
pub const KEY_PREFIX: &str = "sync:";

/// Result of a PARTIAL merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Appended to an existing snapshot.
    Merged,
    /// No snapshot existed; a new one was written.
    Created,
    /// No snapshot existed and the policy left the store untouched.
    Skipped,
}

#[derive(Clone)]
pub struct SyncStateStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SyncStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Storage key for a device's snapshot.
    pub fn key(user_id: &str, device_id: &str) -> String {
        format!("{}{}:{}", KEY_PREFIX, user_id, device_id)
    }

    /// Unconditional overwrite with the store's default TTL.
    pub async fn put(&self, user_id: &str, device_id: &str, state: &SyncState) -> Result<()> {
        self.put_with_ttl(user_id, device_id, state, self.ttl).await
    }

    pub async fn put_with_ttl(
        &self,
        user_id: &str,
        device_id: &str,
        state: &SyncState,
        ttl: Duration,
    ) -> Result<()> {
        let key = Self::key(user_id, device_id);
        let value = serde_json::to_string(state)?;
        self.kv.set(&key, &value, ttl).await?;
        debug!(
            key = %key,
            notifications = state.notifications.len(),
            "Wrote sync state"
        );
        Ok(())
    }

    /// Append `summaries` to the device's snapshot and refresh its
    /// timestamp and TTL. Duplicates are not removed.
    pub async fn merge(
        &self,
        user_id: &str,
        device_id: &str,
        platform: Platform,
        sync_timestamp: i64,
        summaries: Vec<SyncSummary>,
        policy: MissingStatePolicy,
    ) -> Result<MergeOutcome> {
        let (state, outcome) = match self.get(user_id, device_id).await? {
            Some(mut existing) => {
                existing.notifications.extend(summaries);
                existing.sync_timestamp = sync_timestamp;
                existing.platform = platform;
                (existing, MergeOutcome::Merged)
            }
            None if policy == MissingStatePolicy::Skip => {
                warn!(
                    user_id = %user_id,
                    device_id = %device_id,
                    "No sync state to merge into, skipping"
                );
                return Ok(MergeOutcome::Skipped);
            }
            None => (
                SyncState {
                    sync_timestamp,
                    platform,
                    notifications: summaries,
                },
                MergeOutcome::Created,
            ),
        };

        self.put(user_id, device_id, &state).await?;
        Ok(outcome)
    }

    pub async fn get(&self, user_id: &str, device_id: &str) -> Result<Option<SyncState>> {
        self.get_by_key(&Self::key(user_id, device_id)).await
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Option<SyncState>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.kv.del(key).await
    }

    /// Delete every live key starting with `prefix`.
    pub async fn delete_all(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.kv.keys(prefix).await? {
            if self.kv.del(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every live sync-state key.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.kv.keys(KEY_PREFIX).await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.kv.purge_expired().await
    }
}
