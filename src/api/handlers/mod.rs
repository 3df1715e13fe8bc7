//! HTTP endpoint handlers organized by concern.

pub mod system;
pub mod webhook;

use axum::Router;

use crate::app_state::AppState;

/// Composes the server-mode HTTP routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(webhook::routes())
        .merge(system::routes())
}
