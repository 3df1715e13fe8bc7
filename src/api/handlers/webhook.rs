//! GitHub package webhook handler.
//!
//! Each request walks `MethodCheck → BodyRead → SignatureCheck → Decode →
//! PayloadClassify → Dispatch`. Any step may end the request with an
//! error status; everything that reaches classification is answered 200.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};

use crate::api::dto::WebhookAck;
use crate::app_state::AppState;
use crate::domain::WebhookPayload;
use crate::error::{ErrorResponse, RelayError};
use crate::metrics::Outcome;
use crate::signature::{SIGNATURE_HEADER, verify_signature};

/// `POST /webhook` — Receive a GitHub package event.
///
/// # Errors
///
/// Returns [`RelayError`] for non-POST methods, unreadable or malformed
/// bodies, and signature mismatches.
#[utoipa::path(
    post,
    path = "/webhook",
    tag = "Webhook",
    summary = "Receive a package event",
    description = "Accepts GitHub `registry_package` and `ping` deliveries. Published container tags are broadcast to subscribers and reconciled locally.",
    request_body(content = serde_json::Value, content_type = "application/json"),
    params(
        ("X-Hub-Signature-256" = Option<String>, Header, description = "sha256=<hex HMAC of the body>"),
    ),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAck),
        (status = 400, description = "Malformed body", body = ErrorResponse),
        (status = 401, description = "Signature mismatch", body = ErrorResponse),
        (status = 405, description = "Method not allowed", body = ErrorResponse),
    )
)]
pub async fn webhook_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, RelayError> {
    let result = handle_webhook(&state, &method, &headers, body).await;
    match &result {
        Ok(ack) => {
            state.metrics.record_webhook(Outcome::Success);
            tracing::debug!(kind = %ack.kind, "webhook handled");
        }
        Err(e) => {
            state.metrics.record_webhook(Outcome::Fail);
            tracing::info!(error = %e, %method, "webhook rejected");
        }
    }
    result.map(|ack| (StatusCode::OK, Json(ack)))
}

async fn handle_webhook(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<WebhookAck, RelayError> {
    if *method != Method::POST {
        return Err(RelayError::MethodNotAllowed(method.to_string()));
    }

    let bytes = axum::body::to_bytes(body, state.settings.max_body_bytes)
        .await
        .map_err(|e| RelayError::BadRequest(format!("error reading request body: {e}")))?;

    let secret = state.settings.webhook_secret.as_bytes();
    if !secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(signature, &bytes, secret) {
            return Err(RelayError::Unauthorized(
                "signature verification failed".to_string(),
            ));
        }
    }

    let payload = WebhookPayload::decode(&bytes)?;
    let kind = payload.kind();
    match payload {
        WebhookPayload::Published(package) => {
            state.relay.publish_package(&package).await;
        }
        WebhookPayload::Ping { hook_id } => {
            tracing::info!(hook_id, "webhook ping received");
        }
        WebhookPayload::Unrecognized => {
            tracing::debug!("unrecognized webhook payload ignored");
        }
    }

    Ok(WebhookAck::accepted(kind))
}

/// Webhook routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", any(webhook_handler))
}
