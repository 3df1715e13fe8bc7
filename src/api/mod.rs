//! HTTP layer: route handlers, DTOs, OpenAPI document and router
//! composition.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::subscribe_handler;

/// OpenAPI document for the HTTP endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(
        handlers::webhook::webhook_handler,
        handlers::system::health_handler,
        crate::ws::handler::subscribe_handler,
    ),
    components(schemas(
        dto::WebhookAck,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::domain::PublishEvent,
        handlers::system::HealthResponse,
    )),
    tags(
        (name = "Webhook", description = "Inbound registry events"),
        (name = "Subscribe", description = "Live publish event stream"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete server-mode router.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(handlers::routes())
        .route("/subscribe", get(subscribe_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
