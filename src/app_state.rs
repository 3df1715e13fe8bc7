//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::{KeepaliveConfig, RelayConfig};
use crate::metrics::RelayMetrics;
use crate::service::RelayService;

/// Request-handling settings of server mode.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Webhook HMAC secret; empty disables verification.
    pub webhook_secret: String,
    /// Subscription secret; empty disables the check.
    pub subscribe_secret: String,
    /// Keepalive timing of subscriber connections.
    pub keepalive: KeepaliveConfig,
    /// Maximum accepted webhook body size in bytes.
    pub max_body_bytes: usize,
}

impl From<&RelayConfig> for ServerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            webhook_secret: config.webhook_secret.clone(),
            subscribe_secret: config.subscribe_secret.clone(),
            keepalive: config.keepalive,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Relay service for dispatching publish events.
    pub relay: Arc<RelayService>,
    /// Metrics registry.
    pub metrics: Arc<RelayMetrics>,
    /// Secrets and limits.
    pub settings: Arc<ServerSettings>,
}
