//! Hub Routes
//!
//! - GET /api/v1/hubs - Registry snapshot of every hub
//! - GET /api/v1/hubs/:app_id - Registry snapshot of one hub

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::HubsResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::broker::HubStats;

/// GET /api/v1/hubs
pub async fn list_hubs(State(state): State<Arc<AppState>>) -> Json<HubsResponse> {
    let hubs = state.broker.stats().await;
    let total_sessions = hubs.iter().map(|h| h.sessions).sum();

    Json(HubsResponse {
        hubs,
        total_sessions,
    })
}

/// GET /api/v1/hubs/:app_id
///
/// Does not create the hub if it does not exist yet.
pub async fn get_hub(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<HubStats>> {
    let hub = state
        .broker
        .existing_hub(&app_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("hub {app_id}")))?;

    Ok(Json(hub.stats().await))
}
