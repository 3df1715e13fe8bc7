//! Resilient relay client: subscribes to a remote server and reconciles
//! every received event locally.
//!
//! State machine: `Disconnected → Connecting → Connected → Disconnected`.
//! Each failed connect increments the retry count; reaching
//! [`RetryPolicy::max_retries`] ends [`ResilientConnector::run`] with
//! [`ConnectorOutcome::RetriesExhausted`]. A successful connect resets the
//! count, so a session that later drops starts with a fresh budget. Every
//! redial, after a failed connect or a dropped session, waits
//! [`RetryPolicy::retry_delay`] first.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::dialer::{Dialer, FrameStream};
use crate::config::RetryPolicy;
use crate::domain::PublishEvent;
use crate::metrics::{Outcome, RelayMetrics};
use crate::service::ReconciliationMatcher;

/// Connection state of the relay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A session is established.
    Connected,
}

/// Observable connector status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConnectorStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Consecutive failed connects since the last successful one.
    pub retry_count: u32,
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
        }
    }
}

/// How [`ResilientConnector::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorOutcome {
    /// The shutdown token was cancelled.
    Shutdown,
    /// The retry ceiling was reached without connecting.
    RetriesExhausted {
        /// Failed attempts made in the final streak.
        attempts: u32,
    },
}

enum SessionEnd {
    Shutdown,
    Dropped,
}

/// Client-mode session loop.
#[derive(Debug)]
pub struct ResilientConnector {
    dialer: Arc<dyn Dialer>,
    matcher: Arc<ReconciliationMatcher>,
    metrics: Arc<RelayMetrics>,
    policy: RetryPolicy,
    status: watch::Sender<ConnectorStatus>,
}

impl ResilientConnector {
    /// Creates a connector in the `Disconnected` state.
    #[must_use]
    pub fn new(
        dialer: Arc<dyn Dialer>,
        matcher: Arc<ReconciliationMatcher>,
        metrics: Arc<RelayMetrics>,
        policy: RetryPolicy,
    ) -> Self {
        let (status, _) = watch::channel(ConnectorStatus::default());
        Self {
            dialer,
            matcher,
            metrics,
            policy,
            status,
        }
    }

    /// Subscribes to status changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectorStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, state: ConnectionState, retry_count: u32) {
        self.status.send_replace(ConnectorStatus { state, retry_count });
    }

    /// Connects, consumes events and reconnects until shutdown or until the
    /// retry ceiling is reached.
    pub async fn run(&self, shutdown: CancellationToken) -> ConnectorOutcome {
        let mut retry_count: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                self.set_status(ConnectionState::Disconnected, retry_count);
                return ConnectorOutcome::Shutdown;
            }

            self.set_status(ConnectionState::Connecting, retry_count);
            self.metrics.record_connection_attempt();
            tracing::info!(retry = retry_count, "connecting to server");

            let dialed = tokio::select! {
                () = shutdown.cancelled() => {
                    self.set_status(ConnectionState::Disconnected, retry_count);
                    return ConnectorOutcome::Shutdown;
                }
                dialed = self.dialer.dial() => dialed,
            };

            match dialed {
                Ok(frames) => {
                    retry_count = 0;
                    self.set_status(ConnectionState::Connected, retry_count);
                    tracing::info!("connected to server");

                    let end = self.consume(frames, &shutdown).await;
                    self.set_status(ConnectionState::Disconnected, retry_count);
                    match end {
                        SessionEnd::Shutdown => return ConnectorOutcome::Shutdown,
                        SessionEnd::Dropped => {
                            tracing::warn!(
                                delay_ms = self.policy.retry_delay.as_millis(),
                                "session ended, reconnecting"
                            );
                        }
                    }
                }
                Err(e) => {
                    retry_count = retry_count.saturating_add(1);
                    self.set_status(ConnectionState::Disconnected, retry_count);
                    tracing::error!(error = %e, retry = retry_count, "failed to connect to server");

                    if retry_count >= self.policy.max_retries {
                        tracing::error!(attempts = retry_count, "connect retries exhausted");
                        return ConnectorOutcome::RetriesExhausted {
                            attempts: retry_count,
                        };
                    }
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => {
                    self.set_status(ConnectionState::Disconnected, retry_count);
                    return ConnectorOutcome::Shutdown;
                }
                () = tokio::time::sleep(self.policy.retry_delay) => {}
            }
        }
    }

    async fn consume(&self, mut frames: FrameStream, shutdown: &CancellationToken) -> SessionEnd {
        loop {
            let frame = tokio::select! {
                () = shutdown.cancelled() => return SessionEnd::Shutdown,
                frame = frames.next() => frame,
            };

            match frame {
                Some(Ok(Message::Binary(bytes))) => self.handle_frame(&bytes).await,
                Some(Ok(Message::Text(text))) => {
                    tracing::info!(text = %text.as_str(), "received non-binary message");
                    self.metrics.record_message(Outcome::Fail);
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "server closed the session");
                    return SessionEnd::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "error reading message");
                    self.metrics.record_message(Outcome::Fail);
                    return SessionEnd::Dropped;
                }
                None => return SessionEnd::Dropped,
            }
        }
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        let event = match PublishEvent::from_frame(bytes) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "error decoding message");
                self.metrics.record_message(Outcome::Fail);
                return;
            }
        };

        tracing::info!(image_url = %event.image_url, tag = %event.tag, "received message");
        let report = self.matcher.reconcile_event(&event).await;
        let outcome = if report.listing_failed || report.failed > 0 {
            Outcome::Fail
        } else {
            Outcome::Success
        };
        self.metrics.record_message(outcome);
    }
}
