//! System endpoints: health check and Prometheus metrics.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::client::{ConnectionState, ConnectorStatus};
use crate::metrics::RelayMetrics;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<ConnectorStatus>,
    timestamp: String,
    version: String,
}

/// `GET /health` — Server health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, connected subscriber count and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            mode: "server",
            subscribers: Some(state.relay.hub().len()),
            connection: None,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /health` in client mode. Reports the upstream session.
///
/// Answers `503` while the relay client is not connected.
pub async fn client_health_handler(
    State(status): State<watch::Receiver<ConnectorStatus>>,
) -> impl IntoResponse {
    let current = *status.borrow();
    let (code, label) = match current.state {
        ConnectionState::Connected => (StatusCode::OK, "healthy"),
        ConnectionState::Connecting | ConnectionState::Disconnected => {
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    (
        code,
        Json(HealthResponse {
            status: label.to_string(),
            mode: "client",
            subscribers: None,
            connection: Some(current),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics_handler(State(metrics): State<Arc<RelayMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}

/// Routes served in client mode.
pub fn client_routes(status: watch::Receiver<ConnectorStatus>) -> Router {
    Router::new()
        .route("/health", get(client_health_handler))
        .with_state(status)
}

/// Router of the dedicated metrics listener.
pub fn metrics_routes(metrics: Arc<RelayMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}
