//! Read acknowledgements from clients without a persistent connection.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    pub user_id: String,
    pub notification_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
    pub delivered: usize,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<MarkReadResponse>, RelayError> {
    let outcome = state
        .sync
        .mark_read(&body.user_id, &body.notification_ids)
        .await?;

    Ok(Json(MarkReadResponse {
        updated: outcome.updated,
        delivered: outcome.delivered,
    }))
}
