//! Axum WebSocket upgrade handler for `/subscribe`.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::error::{ErrorResponse, RelayError};
use crate::signature::constant_time_eq;

/// Query parameters of the subscribe endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    /// Shared subscription secret.
    #[serde(rename = "authSecret")]
    pub auth_secret: Option<String>,
}

/// `GET /subscribe` — Upgrade to a WebSocket carrying publish events.
///
/// The secret is checked before the upgrade, so an unauthorized client
/// gets a plain `401` whether or not it asked for a WebSocket.
///
/// # Errors
///
/// Returns [`RelayError::Unauthorized`] on a secret mismatch, or the
/// upgrade rejection when the request is not a valid WebSocket handshake.
#[utoipa::path(
    get,
    path = "/subscribe",
    tag = "Subscribe",
    summary = "Subscribe to publish events",
    description = "Upgrades to a WebSocket. The server sends one binary frame per publish event containing `{\"oci_url\", \"tag\"}` and pings periodically; clients must answer with pongs.",
    params(
        ("authSecret" = Option<String>, Query, description = "Subscription secret"),
    ),
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 401, description = "Invalid auth secret", body = ErrorResponse),
    )
)]
pub async fn subscribe_handler(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, RelayError> {
    let expected = state.settings.subscribe_secret.as_bytes();
    if !expected.is_empty() {
        let provided = params.auth_secret.as_deref().unwrap_or_default();
        if !constant_time_eq(provided.as_bytes(), expected) {
            tracing::info!("invalid auth secret from subscriber");
            return Err(RelayError::Unauthorized("invalid auth secret".to_string()));
        }
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = Arc::clone(state.relay.hub());
    let keepalive = state.settings.keepalive;
    Ok(ws
        .on_failed_upgrade(|e| tracing::error!(error = %e, "connection upgrade failed"))
        .on_upgrade(move |socket| async move {
            let subscriber = hub.register();
            run_connection(socket, subscriber, hub, keepalive).await;
        }))
}
