//! flux-relay entry point.
//!
//! Server mode serves `/webhook`, `/subscribe` and `/health`. Client mode
//! subscribes to a remote server, reconciles received events locally and
//! serves `/health`. Both modes optionally expose `/metrics` on a
//! separate listener.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flux_relay::api;
use flux_relay::api::handlers::system::{client_routes, metrics_routes};
use flux_relay::app_state::{AppState, ServerSettings};
use flux_relay::client::{ConnectorOutcome, ResilientConnector, WsDialer};
use flux_relay::config::{Mode, RelayConfig};
use flux_relay::domain::SubscriberHub;
use flux_relay::inventory::{FluxInventory, Inventory};
use flux_relay::metrics::RelayMetrics;
use flux_relay::service::{ReconciliationMatcher, RelayService};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = RelayConfig::from_env().context("loading configuration")?;
    for warning in config.security_warnings() {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        mode = %config.mode,
        addr = %config.listen_addr,
        version = env!("CARGO_PKG_VERSION"),
        "starting flux-relay"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let metrics = Arc::new(RelayMetrics::new(config.mode));
    let inventory: Arc<dyn Inventory> = Arc::new(
        FluxInventory::from_config(&config.inventory).context("building inventory client")?,
    );
    let matcher = Arc::new(ReconciliationMatcher::new(inventory, Arc::clone(&metrics)));

    if config.metrics_enabled {
        let listener = bind_listener(config.metrics_addr, "metrics").await?;
        let router = metrics_routes(Arc::clone(&metrics));
        tokio::spawn(serve_logged(listener, router, shutdown.clone(), "metrics"));
    }

    match config.mode {
        Mode::Server => run_server(&config, matcher, metrics, shutdown).await,
        Mode::Client => run_client(&config, matcher, metrics, shutdown).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_server(
    config: &RelayConfig,
    matcher: Arc<ReconciliationMatcher>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
) -> anyhow::Result<ExitCode> {
    // Subscriber tokens descend from the process token, so a signal closes
    // every socket while the server drains.
    let hub = Arc::new(SubscriberHub::new(
        config.outbox_capacity,
        Arc::clone(&metrics),
        shutdown.child_token(),
    ));
    let relay = Arc::new(RelayService::new(
        Arc::clone(&hub),
        matcher,
        config.registry_host.clone(),
    ));
    let state = AppState {
        relay,
        metrics,
        settings: Arc::new(ServerSettings::from(config)),
    };

    let listener = bind_listener(config.listen_addr, "server").await?;

    axum::serve(listener, api::build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("http server failed")?;

    hub.shutdown();
    tracing::info!("server stopped");
    Ok(ExitCode::SUCCESS)
}

async fn run_client(
    config: &RelayConfig,
    matcher: Arc<ReconciliationMatcher>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let dialer = WsDialer::new(&config.server_endpoint, &config.subscribe_secret)?;
    tracing::info!(endpoint = %dialer.redacted(), "relay client configured");

    let listener = bind_listener(config.listen_addr, "health").await?;
    let connector = ResilientConnector::new(Arc::new(dialer), matcher, metrics, config.retry);
    let health = tokio::spawn(serve_logged(
        listener,
        client_routes(connector.status()),
        shutdown.clone(),
        "health",
    ));

    let outcome = connector.run(shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = health.await {
        tracing::error!(error = %e, "health server task failed");
    }

    match outcome {
        ConnectorOutcome::Shutdown => {
            tracing::info!("client stopped");
            Ok(ExitCode::SUCCESS)
        }
        ConnectorOutcome::RetriesExhausted { attempts } => {
            tracing::error!(attempts, "giving up on server connection");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Binds `addr`, failing startup when the address is unusable.
async fn bind_listener(addr: SocketAddr, name: &'static str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {name} listener on {addr}"))?;
    tracing::info!(%addr, listener = name, "listening");
    Ok(listener)
}

/// Serves `router` on `listener` until `shutdown`, logging instead of failing.
async fn serve_logged(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    name: &'static str,
) {
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, listener = name, "server failed");
    }
}

/// Cancels `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
