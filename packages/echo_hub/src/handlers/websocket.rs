use axum::{
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::AppState;
use crate::registry::ConnectionId;
use crate::ws;

#[derive(Debug, Default, Deserialize)]
pub struct HubQuery {
    /// Connection token handed out by negotiate.
    pub id: Option<String>,
}

/// Upgrade a request on the hub endpoint into a hub connection.
pub async fn hub_websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<HubQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let hub = state.hub.clone();

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            hub.metrics.handshake_failed();
            warn!(error = %rejection, "Rejected non-WebSocket request to hub endpoint");
            return rejection.into_response();
        }
    };

    if hub.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    let requested_id = query
        .id
        .filter(|id| !id.is_empty())
        .map(ConnectionId::from);
    let max = hub.config.max_message_bytes;

    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| {
            let task = ws::handle_connection(socket, hub.clone(), requested_id);
            hub.track(task)
        })
}
