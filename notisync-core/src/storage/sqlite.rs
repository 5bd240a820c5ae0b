//! SQLite backend shared by the key-value store and the notification store.

use super::KeyValueStore;
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Thread-safe SQLite connection with the sync schema applied.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                read_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_kv_entries_expires_at
                ON kv_entries(expires_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_user_unread
                ON notifications(user_id, read_at, created_at);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyncError::Storage(format!("Lock error: {}", e)))
    }

    /// Run `op` against the connection on the blocking pool, so waiting on
    /// the lock or on SQLite never stalls the async runtime.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.conn()?;
            op(&conn)
        })
        .await
        .map_err(|e| SyncError::Storage(format!("Database task failed: {}", e)))?
    }
}

/// Key-value store persisted in the `kv_entries` table. Expiry is stored as
/// an absolute unix time in milliseconds; reads filter on it.
#[derive(Clone)]
pub struct SqliteKvStore {
    db: Database,
}

impl SqliteKvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn deadline(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(ttl_ms)
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let (key, value, expires_at) = (key.to_string(), value.to_string(), deadline(ttl));
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at",
                    rusqlite::params![key, value, expires_at],
                )?;
                Ok(())
            })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .run(move |conn| {
                let now = Utc::now().timestamp_millis();
                let value = conn
                    .query_row(
                        "SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                        rusqlite::params![key, now],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.db
            .run(move |conn| {
                let now = Utc::now().timestamp_millis();
                let removed = conn.execute(
                    "DELETE FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                    rusqlite::params![key, now],
                )?;
                // Expired leftovers under the same key go too.
                conn.execute("DELETE FROM kv_entries WHERE key = ?1", [&key])?;
                Ok(removed > 0)
            })
            .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.db
            .run(move |conn| {
                let now = Utc::now().timestamp_millis();
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv_entries
                     WHERE substr(key, 1, length(?1)) = ?1 AND expires_at > ?2
                     ORDER BY key ASC",
                )?;
                let keys = stmt
                    .query_map(rusqlite::params![prefix, now], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let (key, expires_at) = (key.to_string(), deadline(ttl));
        self.db
            .run(move |conn| {
                let now = Utc::now().timestamp_millis();
                let updated = conn.execute(
                    "UPDATE kv_entries SET expires_at = ?1 WHERE key = ?2 AND expires_at > ?3",
                    rusqlite::params![expires_at, key, now],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.db
            .run(|conn| {
                let now = Utc::now().timestamp_millis();
                let removed =
                    conn.execute("DELETE FROM kv_entries WHERE expires_at <= ?1", [now])?;
                Ok(removed)
            })
            .await
    }
}
