//! Boundary to the external notification store.
//!
//! The store is the single source of truth for notification content and read
//! status. The sync core only reads unread projections, stamps `read_at` on
//! acknowledgement, and prunes old read notifications.

pub mod sqlite;

pub use sqlite::SqliteNotificationStore;

use crate::models::NotificationSummary;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Up to `limit` unread notifications of `user_id`, newest first.
    async fn list_unread(&self, user_id: &str, limit: usize) -> Result<Vec<NotificationSummary>>;

    /// Notifications whose id is in `ids` and whose owner is `owner_id`,
    /// newest first. Ids owned by anyone else are silently left out.
    async fn list_by_ids(&self, ids: &[String], owner_id: &str)
        -> Result<Vec<NotificationSummary>>;

    /// Set `read_at = now` on the notifications in `ids` owned by
    /// `owner_id`. Returns the number of rows updated.
    async fn mark_read(&self, ids: &[String], owner_id: &str, now: DateTime<Utc>)
        -> Result<usize>;

    /// Delete notifications created more than `days` days ago, restricted to
    /// read ones when `only_if_read` is set. Returns the number deleted.
    async fn delete_older_than(&self, days: u32, only_if_read: bool) -> Result<usize>;
}
