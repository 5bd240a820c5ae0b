//! Axum router setup and shared application state.

use crate::config::RelayConfig;
use crate::handlers::{notifications, sync, ws};
use crate::rate_limit::RateLimiter;
use axum::routing::{get, post};
use axum::Router;
use notisync_core::{
    ConnectionRegistry, Database, KeyValueStore, Maintenance, MemoryKvStore, NotificationStore,
    SqliteKvStore, SqliteNotificationStore, SyncService, SyncStateStore,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Everything a request or connection handler needs.
#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncService>,
    pub maintenance: Arc<Maintenance>,
    pub notifications: SqliteNotificationStore,
    pub rate_limiter: RateLimiter,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Open storage named by the config and wire the sync components.
    pub fn open(config: RelayConfig) -> anyhow::Result<Self> {
        let (db, kv): (Database, Arc<dyn KeyValueStore>) = if config.is_in_memory() {
            (Database::in_memory()?, Arc::new(MemoryKvStore::new()))
        } else {
            let db = Database::open(&config.storage_path)?;
            (db.clone(), Arc::new(SqliteKvStore::new(db)))
        };
        Ok(Self::with_stores(config, db, kv))
    }

    fn with_stores(config: RelayConfig, db: Database, kv: Arc<dyn KeyValueStore>) -> Self {
        let settings = config.to_settings();
        let notifications = SqliteNotificationStore::new(db);
        let store: Arc<dyn NotificationStore> = Arc::new(notifications.clone());
        let states = SyncStateStore::new(kv, settings.sync_state_ttl);
        let registry = Arc::new(ConnectionRegistry::new());

        let sync = SyncService::new(store.clone(), states.clone(), registry, settings.clone());
        let maintenance = Maintenance::new(store, states, settings);

        Self {
            sync: Arc::new(sync),
            maintenance: Arc::new(maintenance),
            notifications,
            rate_limiter: RateLimiter::new(config.rate_limit_per_minute),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.sync.registry()
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_payload_size = state.config.max_payload_size;

    let api = Router::new()
        .route("/api/v1/notifications/read", post(notifications::mark_read))
        .route(
            "/api/v1/sync/state/{user_id}/{device_id}",
            get(sync::sync_state),
        )
        .route(
            "/api/v1/users/{user_id}/connections",
            get(sync::user_connections),
        );

    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/health", get(health))
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) fn test_state(config: RelayConfig) -> AppState {
    let db = Database::in_memory().expect("in-memory database");
    AppState::with_stores(config, db, Arc::new(MemoryKvStore::new()))
}
