//! Key-value storage with per-record expiry, and the sync-state store built
//! on top of it.

pub mod memory;
pub mod sqlite;
pub mod sync_state;

pub use memory::MemoryKvStore;
pub use sqlite::{Database, SqliteKvStore};
pub use sync_state::{MergeOutcome, SyncStateStore};

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value store whose records disappear once their TTL elapses.
///
/// Expired records must be invisible to `get` and `keys` immediately, even
/// when physical removal is deferred to `purge_expired`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Unconditional write. Resets the record's TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns true if a live record was removed.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Live keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Reset the TTL of a live record. Returns false if it does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Physically drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}
