use super::*;
use crate::config::MissingStatePolicy;
use crate::models::{NotificationSummary, Platform, SyncResultStatus};
use crate::notifications::SqliteNotificationStore;
use crate::registry::ConnectionHandle;
use crate::storage::{Database, KeyValueStore, MemoryKvStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

struct Fixture {
    service: SyncService,
    store: SqliteNotificationStore,
}

fn fixture_with(settings: SyncSettings) -> Fixture {
    let store = SqliteNotificationStore::new(Database::in_memory().unwrap());
    let states = SyncStateStore::new(Arc::new(MemoryKvStore::new()), settings.sync_state_ttl);
    let service = SyncService::new(
        Arc::new(store.clone()),
        states,
        Arc::new(ConnectionRegistry::new()),
        settings,
    );
    Fixture { service, store }
}

fn fixture() -> Fixture {
    fixture_with(SyncSettings::default())
}

fn seed(store: &SqliteNotificationStore, user_id: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let created = Utc::now() - ChronoDuration::minutes(i as i64);
            store
                .insert(user_id, &format!("notification {}", i), "", created)
                .unwrap()
        })
        .collect()
}

fn connect(service: &SyncService, device_id: &str, user_id: &str) -> Receiver<ServerMessage> {
    let (handle, rx) = ConnectionHandle::channel(device_id, user_id, 16);
    service.registry().register(handle);
    rx
}

fn assert_success(message: &ServerMessage, expected_count: usize) {
    match message {
        ServerMessage::SyncResult {
            status,
            notification_count,
            error,
            ..
        } => {
            assert_eq!(*status, SyncResultStatus::Success, "error: {:?}", error);
            assert_eq!(*notification_count, Some(expected_count));
        }
        other => panic!("expected SYNC_RESULT, got {:?}", other),
    }
}

fn assert_error(message: &ServerMessage) {
    match message {
        ServerMessage::SyncResult { status, error, .. } => {
            assert_eq!(*status, SyncResultStatus::Error);
            assert!(error.is_some());
        }
        other => panic!("expected SYNC_RESULT, got {:?}", other),
    }
}

#[tokio::test]
async fn full_sync_returns_unread_and_writes_state() {
    let f = fixture();
    let ids = seed(&f.store, "U", 3);
    let mut rx = connect(&f.service, "D1", "U");

    let outcome = f
        .service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1000))
        .await;

    assert_eq!(outcome.phase, SyncPhase::ResultSent);
    assert!(outcome.delivered);
    assert_success(&rx.try_recv().unwrap(), 3);

    let state = f.service.states().get("U", "D1").await.unwrap().unwrap();
    assert_eq!(state.sync_timestamp, 1000);
    assert_eq!(state.platform, Platform::Web);
    let stored: Vec<_> = state.notifications.iter().map(|n| n.id.clone()).collect();
    assert_eq!(stored, ids);
}

#[tokio::test]
async fn full_sync_is_capped_at_limit() {
    let f = fixture();
    seed(&f.store, "U", 105);
    let mut rx = connect(&f.service, "D1", "U");

    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Mobile, 1))
        .await;

    assert_success(&rx.try_recv().unwrap(), 100);
    let state = f.service.states().get("U", "D1").await.unwrap().unwrap();
    assert_eq!(state.notifications.len(), 100);
}

#[tokio::test]
async fn full_sync_counts_only_unread() {
    let f = fixture();
    let ids = seed(&f.store, "U", 4);
    f.store
        .mark_read(&ids[..2], "U", Utc::now())
        .await
        .unwrap();
    let mut rx = connect(&f.service, "D1", "U");

    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1))
        .await;

    assert_success(&rx.try_recv().unwrap(), 2);
}

#[tokio::test]
async fn full_sync_overwrites_previous_state() {
    let f = fixture();
    seed(&f.store, "U", 2);
    let _rx = connect(&f.service, "D1", "U");

    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1))
        .await;
    seed(&f.store, "U", 1);
    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 2))
        .await;

    let state = f.service.states().get("U", "D1").await.unwrap().unwrap();
    assert_eq!(state.notifications.len(), 3);
    assert_eq!(state.sync_timestamp, 2);
}

#[tokio::test]
async fn partial_sync_never_leaks_other_users_notifications() {
    let f = fixture();
    let mine = seed(&f.store, "U", 2);
    let theirs = seed(&f.store, "V", 2);
    let mut rx = connect(&f.service, "D1", "U");

    let request = SyncRequest::partial(
        "U",
        "D1",
        Platform::Desktop,
        7,
        vec![mine[0].clone(), theirs[0].clone(), theirs[1].clone()],
    );
    f.service.handle_sync(request).await;

    assert_success(&rx.try_recv().unwrap(), 1);
    let state = f.service.states().get("U", "D1").await.unwrap().unwrap();
    assert_eq!(state.notifications.len(), 1);
    assert_eq!(state.notifications[0].id, mine[0]);
}

#[tokio::test]
async fn partial_sync_appends_to_existing_state() {
    let f = fixture();
    let ids = seed(&f.store, "U", 3);
    let _rx = connect(&f.service, "D1", "U");

    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1))
        .await;
    f.service
        .handle_sync(SyncRequest::partial(
            "U",
            "D1",
            Platform::Web,
            2,
            vec![ids[0].clone()],
        ))
        .await;

    let state = f.service.states().get("U", "D1").await.unwrap().unwrap();
    assert_eq!(state.notifications.len(), 4);
    assert_eq!(state.sync_timestamp, 2);
}

#[tokio::test]
async fn partial_sync_without_state_creates_record() {
    let f = fixture();
    let ids = seed(&f.store, "U", 2);
    let mut rx = connect(&f.service, "D1", "U");

    f.service
        .handle_sync(SyncRequest::partial("U", "D1", Platform::Web, 3, ids))
        .await;

    assert_success(&rx.try_recv().unwrap(), 2);
    let state = f.service.states().get("U", "D1").await.unwrap().unwrap();
    assert_eq!(state.notifications.len(), 2);
}

#[tokio::test]
async fn partial_sync_without_state_can_skip() {
    let f = fixture_with(SyncSettings {
        missing_state_policy: MissingStatePolicy::Skip,
        ..SyncSettings::default()
    });
    let ids = seed(&f.store, "U", 2);
    let mut rx = connect(&f.service, "D1", "U");

    let outcome = f
        .service
        .handle_sync(SyncRequest::partial("U", "D1", Platform::Web, 3, ids))
        .await;

    assert_eq!(outcome.phase, SyncPhase::ResultSent);
    assert_success(&rx.try_recv().unwrap(), 2);
    assert!(f.service.states().get("U", "D1").await.unwrap().is_none());
}

#[tokio::test]
async fn partial_sync_with_empty_ids_is_an_error_without_mutation() {
    let f = fixture();
    let mut rx = connect(&f.service, "D1", "U");

    let outcome = f
        .service
        .handle_sync(SyncRequest::partial("U", "D1", Platform::Web, 1, vec![]))
        .await;

    assert_eq!(outcome.phase, SyncPhase::Failed);
    assert_error(&rx.try_recv().unwrap());
    assert!(f.service.states().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn result_for_disconnected_device_is_dropped_silently() {
    let f = fixture();
    seed(&f.store, "U", 1);

    let outcome = f
        .service
        .handle_sync(SyncRequest::full("U", "gone", Platform::Web, 1))
        .await;

    assert_eq!(outcome.phase, SyncPhase::ResultSent);
    assert!(!outcome.delivered);
    assert!(f.service.states().get("U", "gone").await.unwrap().is_some());
}

#[tokio::test]
async fn mark_read_broadcasts_to_every_connected_device() {
    let f = fixture();
    let ids = seed(&f.store, "U", 3);
    let mut d1 = connect(&f.service, "D1", "U");

    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1))
        .await;
    assert_success(&d1.try_recv().unwrap(), 3);

    let mut d2 = connect(&f.service, "D2", "U");
    let mut other = connect(&f.service, "X1", "V");

    let outcome = f.service.mark_read("U", &ids[..1]).await.unwrap();
    assert_eq!(outcome, MarkReadOutcome { updated: 1, delivered: 2 });

    let expected = ServerMessage::NotificationsRead {
        notification_ids: vec![ids[0].clone()],
    };
    assert_eq!(d1.try_recv().unwrap(), expected);
    assert_eq!(d2.try_recv().unwrap(), expected);
    assert!(d1.try_recv().is_err());
    assert!(other.try_recv().is_err());

    let unread = f.store.list_unread("U", 100).await.unwrap();
    assert!(unread.iter().all(|n| n.id != ids[0]));
}

#[tokio::test]
async fn devices_connecting_after_mark_read_receive_nothing() {
    let f = fixture();
    let ids = seed(&f.store, "U", 1);

    let outcome = f.service.mark_read("U", &ids).await.unwrap();
    assert_eq!(outcome.delivered, 0);

    let mut late = connect(&f.service, "D9", "U");
    assert!(late.try_recv().is_err());
}

#[tokio::test]
async fn mark_read_for_offline_user_is_not_an_error() {
    let f = fixture();
    let outcome = f
        .service
        .mark_read("nobody", &["n1".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome, MarkReadOutcome { updated: 0, delivered: 0 });
}

#[tokio::test]
async fn mark_read_rejects_empty_ids() {
    let f = fixture();
    let err = f.service.mark_read("U", &[]).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidRequest(_)));
}

struct StalledStore;

#[async_trait]
impl NotificationStore for StalledStore {
    async fn list_unread(&self, _: &str, _: usize) -> Result<Vec<NotificationSummary>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn list_by_ids(&self, _: &[String], _: &str) -> Result<Vec<NotificationSummary>> {
        Err(SyncError::Storage("connection refused".to_string()))
    }

    async fn mark_read(&self, _: &[String], _: &str, _: DateTime<Utc>) -> Result<usize> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(0)
    }

    async fn delete_older_than(&self, _: u32, _: bool) -> Result<usize> {
        Ok(0)
    }
}

fn stalled_service() -> SyncService {
    let settings = SyncSettings {
        store_timeout: Duration::from_millis(50),
        ..SyncSettings::default()
    };
    SyncService::new(
        Arc::new(StalledStore),
        SyncStateStore::new(Arc::new(MemoryKvStore::new()), settings.sync_state_ttl),
        Arc::new(ConnectionRegistry::new()),
        settings,
    )
}

#[tokio::test(start_paused = true)]
async fn store_timeout_becomes_error_result() {
    let service = stalled_service();
    let mut rx = connect(&service, "D1", "U");

    let outcome = service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1))
        .await;

    assert_eq!(outcome.phase, SyncPhase::Failed);
    assert_error(&rx.try_recv().unwrap());
    assert!(service.states().get("U", "D1").await.unwrap().is_none());
}

#[tokio::test]
async fn store_failure_becomes_error_result() {
    let service = stalled_service();
    let mut rx = connect(&service, "D1", "U");

    let outcome = service
        .handle_sync(SyncRequest::partial(
            "U",
            "D1",
            Platform::Web,
            1,
            vec!["n1".to_string()],
        ))
        .await;

    assert_eq!(outcome.phase, SyncPhase::Failed);
    match rx.try_recv().unwrap() {
        ServerMessage::SyncResult { error, .. } => {
            assert!(error.unwrap().contains("connection refused"));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn mark_read_timeout_skips_broadcast() {
    let service = stalled_service();
    let mut rx = connect(&service, "D1", "U");

    let err = service
        .mark_read("U", &["n1".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Timeout(50)));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sync_state_lookup_reports_missing_device() {
    let f = fixture();
    seed(&f.store, "U", 1);
    let _rx = connect(&f.service, "D1", "U");

    let err = f.service.sync_state("U", "D1").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    f.service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 7))
        .await;
    let state = f.service.sync_state("U", "D1").await.unwrap();
    assert_eq!(state.sync_timestamp, 7);
}

#[tokio::test]
async fn locked_database_times_out_instead_of_blocking() {
    let db = Database::in_memory().unwrap();
    let store = SqliteNotificationStore::new(db.clone());
    let settings = SyncSettings {
        store_timeout: Duration::from_millis(50),
        ..SyncSettings::default()
    };
    let service = SyncService::new(
        Arc::new(store),
        SyncStateStore::new(Arc::new(MemoryKvStore::new()), settings.sync_state_ttl),
        Arc::new(ConnectionRegistry::new()),
        settings,
    );
    let mut rx = connect(&service, "D1", "U");

    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = std::thread::spawn(move || {
        let _guard = db.conn().unwrap();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(500));
    });
    locked_rx.recv().unwrap();

    let started = std::time::Instant::now();
    let outcome = service
        .handle_sync(SyncRequest::full("U", "D1", Platform::Web, 1))
        .await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(outcome.phase, SyncPhase::Failed);
    match rx.try_recv().unwrap() {
        ServerMessage::SyncResult { error, .. } => {
            assert!(error.unwrap().contains("timed out"));
        }
        other => panic!("unexpected message: {:?}", other),
    }
    holder.join().unwrap();
}

/// Key-value store whose reads answer at once and whose writes never finish.
struct StalledKv;

#[async_trait]
impl KeyValueStore for StalledKv {
    async fn set(&self, _: &str, _: &str, _: Duration) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn get(&self, _: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn del(&self, _: &str) -> Result<bool> {
        Ok(false)
    }

    async fn keys(&self, _: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn expire(&self, _: &str, _: Duration) -> Result<bool> {
        Ok(false)
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn stalled_state_write_becomes_error_result() {
    let store = SqliteNotificationStore::new(Database::in_memory().unwrap());
    seed(&store, "U", 2);
    let settings = SyncSettings {
        store_timeout: Duration::from_millis(50),
        ..SyncSettings::default()
    };
    let service = SyncService::new(
        Arc::new(store),
        SyncStateStore::new(Arc::new(StalledKv), settings.sync_state_ttl),
        Arc::new(ConnectionRegistry::new()),
        settings,
    );
    let mut rx = connect(&service, "D1", "U");

    for request in [
        SyncRequest::full("U", "D1", Platform::Web, 1),
        SyncRequest::partial("U", "D1", Platform::Web, 2, vec!["n1".to_string()]),
    ] {
        let outcome = service.handle_sync(request).await;
        assert_eq!(outcome.phase, SyncPhase::Failed);
        match rx.try_recv().unwrap() {
            ServerMessage::SyncResult { error, .. } => {
                assert_eq!(error.as_deref(), Some("Store operation timed out after 50 ms"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
