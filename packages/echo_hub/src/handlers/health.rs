use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;
use crate::registry::ConnectionInfo;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let hub = &state.hub;
    let metrics = hub.metrics.snapshot();

    let status = if hub.is_shutting_down() {
        "draining"
    } else if metrics.errors.protocol == 0 && metrics.errors.send_failures == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        encoding: hub.config.encoding.to_string(),
        connections: hub.registry.len().await as u64,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.metrics.snapshot())
}

/// Liveness check: returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness check: 503 once shutdown has started
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    if state.hub.is_shutting_down() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "draining" })),
        )
            .into_response()
    } else {
        Json(serde_json::json!({ "status": "ready" })).into_response()
    }
}

/// Registered connections, oldest first.
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    let mut connections: Vec<ConnectionInfo> = state
        .hub
        .registry
        .snapshot()
        .await
        .iter()
        .map(|conn| ConnectionInfo::from(conn.as_ref()))
        .collect();
    connections.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
    Json(connections)
}
