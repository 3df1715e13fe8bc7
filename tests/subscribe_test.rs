//! End-to-end tests for `/subscribe` over real sockets, including a
//! client-mode connector subscribed to a live server.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{TestRelay, eventually, item, published_body, relay};
use flux_relay::client::{ConnectionState, ConnectorOutcome, ResilientConnector, WsDialer};
use flux_relay::config::{Mode, RetryPolicy};
use flux_relay::domain::PublishEvent;
use flux_relay::inventory::{InMemoryInventory, Inventory};
use flux_relay::metrics::{Outcome, RelayMetrics};
use flux_relay::service::ReconciliationMatcher;
use flux_relay::signature::{SIGNATURE_HEADER, sign};

const WEBHOOK_SECRET: &str = "webhook-secret";
const SUBSCRIBE_SECRET: &str = "subscribe-secret";

async fn serve(relay: &TestRelay) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = relay.router.clone();
    let shutdown = relay.shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });
    addr
}

async fn post_webhook(addr: SocketAddr, body: Vec<u8>) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{addr}/webhook"))
        .header(SIGNATURE_HEADER, sign(WEBHOOK_SECRET.as_bytes(), &body))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_wrong_auth_secret_is_unauthorized() {
    let relay = relay(WEBHOOK_SECRET, SUBSCRIBE_SECRET, Vec::new());

    for uri in ["/subscribe", "/subscribe?authSecret=nope"] {
        let response = relay
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    assert!(relay.hub.is_empty());
}

#[tokio::test]
async fn test_authorized_plain_request_is_not_upgraded() {
    let relay = relay(WEBHOOK_SECRET, SUBSCRIBE_SECRET, Vec::new());

    let response = relay
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/subscribe?authSecret={SUBSCRIBE_SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(relay.hub.is_empty());
}

#[tokio::test]
async fn test_handshake_with_wrong_secret_fails() {
    let relay = relay(WEBHOOK_SECRET, SUBSCRIBE_SECRET, Vec::new());
    let addr = serve(&relay).await;

    let result = connect_async(format!("ws://{addr}/subscribe?authSecret=nope")).await;
    let Err(WsError::Http(response)) = result else {
        panic!("expected http rejection");
    };
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    relay.shutdown.cancel();
}

#[tokio::test]
async fn test_subscriber_receives_published_event() {
    let relay = relay(WEBHOOK_SECRET, SUBSCRIBE_SECRET, Vec::new());
    let addr = serve(&relay).await;

    let (mut socket, _) = connect_async(format!(
        "ws://{addr}/subscribe?authSecret={SUBSCRIBE_SECRET}"
    ))
    .await
    .unwrap();
    assert!(eventually(|| relay.hub.len() == 1).await);
    assert_eq!(relay.metrics.clients_connected(), 1);

    let status = post_webhook(addr, published_body("acme", "api", "v3")).await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let frame = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Binary(bytes))) => return bytes,
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(
        PublishEvent::from_frame(&frame).unwrap(),
        PublishEvent::new("oci://registry/acme/api", "v3")
    );

    socket.close(None).await.unwrap();
    assert!(eventually(|| relay.hub.is_empty()).await);
    assert_eq!(relay.metrics.clients_connected(), 0);
    relay.shutdown.cancel();
}

#[tokio::test]
async fn test_polled_subscriber_survives_keepalive_window() {
    let relay = relay(WEBHOOK_SECRET, SUBSCRIBE_SECRET, Vec::new());
    let addr = serve(&relay).await;

    let (mut socket, _) = connect_async(format!(
        "ws://{addr}/subscribe?authSecret={SUBSCRIBE_SECRET}"
    ))
    .await
    .unwrap();
    assert!(eventually(|| relay.hub.len() == 1).await);

    // Three times the 2s pong wait; reading lets tungstenite answer pings.
    let window = tokio::time::sleep(Duration::from_secs(6));
    tokio::pin!(window);
    let mut pings = 0;
    loop {
        tokio::select! {
            () = &mut window => break,
            msg = socket.next() => match msg {
                Some(Ok(Message::Ping(_))) => pings += 1,
                Some(Ok(_)) => {}
                other => panic!("subscriber dropped during keepalive: {other:?}"),
            },
        }
    }

    assert!(pings >= 2, "expected periodic pings, got {pings}");
    assert_eq!(relay.hub.len(), 1);
    assert_eq!(relay.metrics.clients_connected(), 1);

    socket.close(None).await.unwrap();
    assert!(eventually(|| relay.hub.is_empty()).await);
    relay.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_subscriber_sockets() {
    let relay = relay(WEBHOOK_SECRET, "", Vec::new());
    let addr = serve(&relay).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/subscribe")).await.unwrap();
    assert!(eventually(|| relay.hub.len() == 1).await);

    relay.hub.shutdown();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
    assert!(eventually(|| relay.hub.is_empty()).await);
    relay.shutdown.cancel();
}

#[tokio::test]
async fn test_client_mode_reconciles_remote_events() {
    let server = relay(WEBHOOK_SECRET, SUBSCRIBE_SECRET, Vec::new());
    let addr = serve(&server).await;

    let local_inventory = Arc::new(InMemoryInventory::new(vec![item("api", "acme", "v4")]));
    let local_metrics = Arc::new(RelayMetrics::new(Mode::Client));
    let matcher = Arc::new(ReconciliationMatcher::new(
        Arc::clone(&local_inventory) as Arc<dyn Inventory>,
        Arc::clone(&local_metrics),
    ));
    let dialer = WsDialer::new(&format!("ws://{addr}/subscribe"), SUBSCRIBE_SECRET).unwrap();
    let connector = Arc::new(ResilientConnector::new(
        Arc::new(dialer),
        matcher,
        Arc::clone(&local_metrics),
        RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(50),
        },
    ));
    let status = connector.status();

    let client_shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let connector = Arc::clone(&connector);
        let token = client_shutdown.clone();
        async move { connector.run(token).await }
    });

    assert!(eventually(|| status.borrow().state == ConnectionState::Connected).await);
    assert!(eventually(|| server.hub.len() == 1).await);

    let code = post_webhook(addr, published_body("acme", "api", "v4")).await;
    assert_eq!(code, reqwest::StatusCode::OK);

    assert!(eventually(|| local_inventory.patches().len() == 1).await);
    assert_eq!(local_metrics.messages_processed(Outcome::Success), 1);

    client_shutdown.cancel();
    assert_eq!(run.await.unwrap(), ConnectorOutcome::Shutdown);
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_client_redials_dropped_sessions_at_retry_pace() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    tokio::spawn({
        let accepted = Arc::clone(&accepted);
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await {
                    let _ = socket.close(None).await;
                }
            }
        }
    });

    let metrics = Arc::new(RelayMetrics::new(Mode::Client));
    let inventory: Arc<dyn Inventory> = Arc::new(InMemoryInventory::new(Vec::new()));
    let matcher = Arc::new(ReconciliationMatcher::new(inventory, Arc::clone(&metrics)));
    let dialer = WsDialer::new(&format!("ws://{addr}/subscribe"), SUBSCRIBE_SECRET).unwrap();
    let connector = ResilientConnector::new(
        Arc::new(dialer),
        matcher,
        Arc::clone(&metrics),
        RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        },
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        trigger.cancel();
    });
    assert_eq!(connector.run(shutdown).await, ConnectorOutcome::Shutdown);

    let dials = accepted.load(Ordering::SeqCst);
    assert!((2..=5).contains(&dials), "expected paced redials, got {dials}");
    assert!(metrics.connection_attempts() >= dials as u64);
    assert_eq!(connector.status().borrow().retry_count, 0);
}
