//! In-process key-value store with lazy expiry.

use super::KeyValueStore;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct Record {
    value: String,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Records are kept until overwritten, deleted, or purged; reads skip
/// anything past its deadline.
#[derive(Default)]
pub struct MemoryKvStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records held, including expired ones not yet purged.
    pub fn raw_len(&self) -> usize {
        self.records().len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let record = Record {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.records().insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .records()
            .get(key)
            .filter(|r| r.is_live(now))
            .map(|r| r.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .records()
            .remove(key)
            .is_some_and(|r| r.is_live(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .records()
            .iter()
            .filter(|(k, r)| k.starts_with(prefix) && r.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.records().get_mut(key) {
            Some(record) if record.is_live(now) => {
                record.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, r| r.is_live(now));
        Ok(before - records.len())
    }
}
