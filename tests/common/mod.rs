//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request};
use tokio_util::sync::CancellationToken;

use flux_relay::api::build_router;
use flux_relay::app_state::{AppState, ServerSettings};
use flux_relay::config::{KeepaliveConfig, Mode};
use flux_relay::domain::SubscriberHub;
use flux_relay::inventory::{InMemoryInventory, Inventory, InventoryItem};
use flux_relay::metrics::RelayMetrics;
use flux_relay::service::{ReconciliationMatcher, RelayService};
use flux_relay::signature::{SIGNATURE_HEADER, sign};

/// Registry host used by every fixture.
pub const REGISTRY_HOST: &str = "registry";

/// A server-mode relay wired to an in-memory inventory.
pub struct TestRelay {
    pub router: Router,
    pub hub: Arc<SubscriberHub>,
    pub inventory: Arc<InMemoryInventory>,
    pub metrics: Arc<RelayMetrics>,
    pub shutdown: CancellationToken,
}

/// Builds a relay with the given secrets and inventory.
pub fn relay(webhook_secret: &str, subscribe_secret: &str, items: Vec<InventoryItem>) -> TestRelay {
    let metrics = Arc::new(RelayMetrics::new(Mode::Server));
    let inventory = Arc::new(InMemoryInventory::new(items));
    let shutdown = CancellationToken::new();
    let hub = Arc::new(SubscriberHub::new(16, Arc::clone(&metrics), shutdown.child_token()));
    let matcher = Arc::new(ReconciliationMatcher::new(
        Arc::clone(&inventory) as Arc<dyn Inventory>,
        Arc::clone(&metrics),
    ));
    let state = AppState {
        relay: Arc::new(RelayService::new(Arc::clone(&hub), matcher, REGISTRY_HOST)),
        metrics: Arc::clone(&metrics),
        settings: Arc::new(ServerSettings {
            webhook_secret: webhook_secret.to_string(),
            subscribe_secret: subscribe_secret.to_string(),
            keepalive: KeepaliveConfig::from_pong_wait(Duration::from_secs(2)),
            max_body_bytes: 64 * 1024,
        }),
    };
    TestRelay {
        router: build_router(state),
        hub,
        inventory,
        metrics,
        shutdown,
    }
}

/// Inventory item following `oci://registry/<namespace>/<name>` at `tag`.
pub fn item(name: &str, namespace: &str, tag: &str) -> InventoryItem {
    InventoryItem {
        name: name.to_string(),
        namespace: "flux-system".to_string(),
        source_url: format!("oci://{REGISTRY_HOST}/{namespace}/{name}"),
        source_tag: tag.to_string(),
        ..InventoryItem::default()
    }
}

/// A `registry_package` published body for `namespace/name:tag`.
pub fn published_body(namespace: &str, name: &str, tag: &str) -> Vec<u8> {
    serde_json::json!({
        "action": "published",
        "registry_package": {
            "name": name,
            "namespace": namespace,
            "package_type": "CONTAINER",
            "package_version": {
                "container_metadata": { "tag": { "name": tag } }
            }
        }
    })
    .to_string()
    .into_bytes()
}

/// A POST to `/webhook`, signed with `secret` when given.
pub fn webhook_request(body: Vec<u8>, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhook")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(SIGNATURE_HEADER, sign(secret.as_bytes(), &body));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Polls `condition` every 10ms for up to two seconds.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
