//! Read-only views of sync state and live connections.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use notisync_core::SyncState;
use serde::Serialize;

pub async fn sync_state(
    State(state): State<AppState>,
    Path((user_id, device_id)): Path<(String, String)>,
) -> Result<Json<SyncState>, RelayError> {
    let stored = state.sync.sync_state(&user_id, &device_id).await?;
    Ok(Json(stored))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsResponse {
    pub user_id: String,
    pub connections: usize,
    pub device_ids: Vec<String>,
}

pub async fn user_connections(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<ConnectionsResponse> {
    let mut device_ids: Vec<String> = state
        .registry()
        .connections_for_user(&user_id)
        .iter()
        .map(|handle| handle.device_id().to_string())
        .collect();
    device_ids.sort();

    Json(ConnectionsResponse {
        connections: device_ids.len(),
        user_id,
        device_ids,
    })
}
