//! Push Routes
//!
//! - POST /api/v1/push - Send a message to users of an application

use axum::{extract::State, http::StatusCode, Json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::dto::{PushRequest, PushResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::broker::{filter, Envelope, MessageKind};

/// POST /api/v1/push
///
/// Queues the message on the application's hub and returns without waiting
/// for delivery.
pub async fn push_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PushRequest>,
) -> ApiResult<(StatusCode, Json<PushResponse>)> {
    if request.app_id.trim().is_empty() {
        return Err(ApiError::Validation("app_id is required".to_string()));
    }
    if request.user_ids.iter().any(|u| u.is_empty()) {
        return Err(ApiError::Validation("user_ids must not contain empty ids".to_string()));
    }
    if !matches!(request.kind, MessageKind::Text | MessageKind::Binary) {
        return Err(ApiError::Validation(format!(
            "kind must be text or binary, got {:?}",
            request.kind
        )));
    }

    let mut envelope =
        Envelope::new(request.kind, request.message).to_users(request.user_ids);
    if !request.params.is_empty() {
        envelope = envelope.with_filter(params_filter(request.params));
    }
    let envelope_id = envelope.id();

    state.broker.push(&request.app_id, envelope).await?;

    tracing::debug!(app_id = %request.app_id, envelope_id = %envelope_id, "Message pushed");

    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse {
            status: "accepted".to_string(),
            envelope_id,
            app_id: request.app_id,
        }),
    ))
}

/// Match sessions whose connect parameters contain every pair
fn params_filter(expected: HashMap<String, String>) -> crate::broker::Filter {
    filter(move |session| {
        expected
            .iter()
            .all(|(key, value)| session.get_param(key) == value.as_str())
    })
}
