//! Notification store backed by the `notifications` table.

use super::NotificationStore;
use crate::models::NotificationSummary;
use crate::storage::Database;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params_from_iter, types::Value, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteNotificationStore {
    db: Database,
}

impl SqliteNotificationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a notification. Used for seeding and administration; the sync
    /// core itself never creates content.
    pub fn insert(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO notifications (id, user_id, title, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, user_id, title, body, created_at.timestamp_millis()],
        )?;
        Ok(id)
    }

    /// Number of unread notifications for a user.
    pub fn count_unread(&self, user_id: &str) -> Result<usize> {
        let conn = self.db.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read_at IS NULL",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationSummary> {
    let created_at: i64 = row.get(2)?;
    let read_at: Option<i64> = row.get(3)?;
    Ok(NotificationSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: from_millis(created_at),
        read_at: read_at.map(from_millis),
    })
}

/// `?{first}, ?{first+1}, ...` for an IN list of `count` values.
fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn owner_and_ids(owner_id: &str, ids: &[String]) -> Vec<Value> {
    std::iter::once(Value::Text(owner_id.to_string()))
        .chain(ids.iter().map(|id| Value::Text(id.clone())))
        .collect()
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn list_unread(&self, user_id: &str, limit: usize) -> Result<Vec<NotificationSummary>> {
        let user_id = user_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, created_at, read_at FROM notifications
                     WHERE user_id = ?1 AND read_at IS NULL
                     ORDER BY created_at DESC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, limit], summary_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    async fn list_by_ids(
        &self,
        ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<NotificationSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, title, created_at, read_at FROM notifications
             WHERE user_id = ?1 AND id IN ({})
             ORDER BY created_at DESC, id ASC",
            placeholders(2, ids.len())
        );
        let params = owner_and_ids(owner_id, ids);
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params), summary_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    async fn mark_read(
        &self,
        ids: &[String],
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE notifications SET read_at = ?{}
             WHERE user_id = ?1 AND id IN ({})",
            ids.len() + 2,
            placeholders(2, ids.len())
        );
        let mut params = owner_and_ids(owner_id, ids);
        params.push(Value::Integer(now.timestamp_millis()));
        self.db
            .run(move |conn| Ok(conn.execute(&sql, params_from_iter(params))?))
            .await
    }

    async fn delete_older_than(&self, days: u32, only_if_read: bool) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(i64::from(days))).timestamp_millis();
        let sql = if only_if_read {
            "DELETE FROM notifications WHERE created_at < ?1 AND read_at IS NOT NULL"
        } else {
            "DELETE FROM notifications WHERE created_at < ?1"
        };
        self.db
            .run(move |conn| Ok(conn.execute(sql, [cutoff])?))
            .await
    }
}
