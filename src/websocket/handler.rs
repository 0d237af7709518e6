//! WebSocket Handler
//!
//! Admits the upgrade request, then hands the socket to the broker for the
//! rest of the connection's life.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{ApiResult, AppState};
use crate::broker::{Broker, ConnectRequest};

/// GET /ws?appId=..&userId=..
///
/// Requests without both identifiers, or for a closed hub, are refused
/// before the upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let request = ConnectRequest::from_params(params);
    state.broker.admit(&request).await?;

    let limit = state.broker.config().max_message_size;
    let broker = Arc::clone(&state.broker);

    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, broker, request)))
}

/// Run an established connection through the broker
async fn handle_socket(socket: WebSocket, broker: Arc<Broker>, request: ConnectRequest) {
    let (sink, stream) = socket.split();

    // The hub may have closed between admission and upgrade
    if let Err(e) = broker.handle_connect(request, sink, stream).await {
        tracing::warn!(error = %e, "WebSocket session refused after upgrade");
    }
}
