//! Per-subscriber connection worker.
//!
//! Drains the subscriber outbox onto the socket as binary frames, pings
//! the peer every `ping_period` and drops the connection when no pong
//! arrives within `pong_wait`. The worker owns the only writer of its
//! socket; the hub never touches the network.

use std::fmt::Display;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::KeepaliveConfig;
use crate::domain::{Subscriber, SubscriberGuard, SubscriberHub, SubscriberId};
use crate::error::RelayError;

/// Why a subscriber session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The hub evicted the subscriber or is shutting down.
    HubClosed,
    /// The outbox was dropped and fully drained.
    OutboxClosed,
    /// The peer sent a close frame or ended the stream.
    PeerClosed,
    /// No pong within the keepalive window.
    PongTimeout,
    /// Writing a frame to the socket failed.
    WriteFailed,
    /// Reading from the socket failed.
    ReadFailed,
    /// An event could not be encoded into a frame.
    EncodeFailed,
}

/// Runs the worker for an upgraded `/subscribe` socket.
pub async fn run_connection(
    socket: WebSocket,
    subscriber: Subscriber,
    hub: Arc<SubscriberHub>,
    keepalive: KeepaliveConfig,
) {
    let (ws_tx, ws_rx) = socket.split();
    let id = subscriber.id();
    let reason = run_session(ws_tx, ws_rx, subscriber, hub, keepalive).await;
    tracing::debug!(subscriber_id = %id, ?reason, "subscriber connection closed");
}

/// Drives one subscriber session over any message sink/stream pair.
///
/// The subscriber is unregistered from `hub` on every exit path.
pub async fn run_session<Tx, Rx>(
    mut ws_tx: Tx,
    mut ws_rx: Rx,
    mut subscriber: Subscriber,
    hub: Arc<SubscriberHub>,
    keepalive: KeepaliveConfig,
) -> CloseReason
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let id = subscriber.id();
    let _guard = SubscriberGuard::new(hub, id);
    let closed = subscriber.close_token();

    let mut ping = tokio::time::interval_at(
        Instant::now() + keepalive.ping_period,
        keepalive.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep(keepalive.pong_wait);
    tokio::pin!(deadline);

    tracing::info!(subscriber_id = %id, "subscriber connected");

    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => {
                if let Err(e) = ws_tx.send(Message::Close(None)).await {
                    tracing::debug!(subscriber_id = %id, error = %e, "close frame not sent");
                }
                return CloseReason::HubClosed;
            }
            event = subscriber.recv() => {
                let Some(event) = event else {
                    return CloseReason::OutboxClosed;
                };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        let err = RelayError::Transport(format!("encoding {event}: {e}"));
                        return transport_failure(id, CloseReason::EncodeFailed, &err);
                    }
                };
                if let Err(e) = ws_tx.send(Message::Binary(frame.into())).await {
                    let err = RelayError::Transport(format!("writing event: {e}"));
                    return transport_failure(id, CloseReason::WriteFailed, &err);
                }
                tracing::debug!(subscriber_id = %id, %event, "event delivered");
            }
            _ = ping.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(Bytes::new())).await {
                    let err = RelayError::Transport(format!("writing ping: {e}"));
                    return transport_failure(id, CloseReason::WriteFailed, &err);
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        deadline.as_mut().reset(Instant::now() + keepalive.pong_wait);
                    }
                    Some(Ok(Message::Close(_))) | None => return CloseReason::PeerClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = RelayError::Transport(format!("reading: {e}"));
                        return transport_failure(id, CloseReason::ReadFailed, &err);
                    }
                }
            }
            () = &mut deadline => {
                tracing::info!(subscriber_id = %id, "pong timeout");
                return CloseReason::PongTimeout;
            }
        }
    }
}

/// Logs a transport error that tears the session down.
fn transport_failure(id: SubscriberId, reason: CloseReason, err: &RelayError) -> CloseReason {
    tracing::info!(
        subscriber_id = %id,
        code = err.error_code(),
        error = %err,
        ?reason,
        "subscriber transport failed"
    );
    reason
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use futures_util::{sink, stream};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Mode;
    use crate::domain::PublishEvent;
    use crate::metrics::RelayMetrics;

    type Inbound = Result<Message, axum::Error>;

    fn capture_sink() -> (
        impl Sink<Message, Error = Infallible> + Unpin,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Box::pin(sink::unfold(tx, |tx, msg: Message| async move {
            let _ = tx.send(msg);
            Ok::<_, Infallible>(tx)
        }));
        (sink, rx)
    }

    fn inbound_stream(
        rx: mpsc::UnboundedReceiver<Inbound>,
    ) -> impl Stream<Item = Inbound> + Unpin {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        }))
    }

    fn hub() -> Arc<SubscriberHub> {
        Arc::new(SubscriberHub::new(
            8,
            Arc::new(RelayMetrics::new(Mode::Server)),
            CancellationToken::new(),
        ))
    }

    fn slow_keepalive() -> KeepaliveConfig {
        KeepaliveConfig::from_pong_wait(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_event_written_as_binary_frame() {
        let hub = hub();
        let subscriber = hub.register();
        let (out_tx, mut out_rx) = capture_sink();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let session = tokio::spawn(run_session(
            out_tx,
            inbound_stream(in_rx),
            subscriber,
            Arc::clone(&hub),
            slow_keepalive(),
        ));

        let event = PublishEvent::new("oci://ghcr.io/acme/app", "v2");
        let report = hub.broadcast(&event);
        assert_eq!(report.delivered, 1);

        let Some(Message::Binary(frame)) = out_rx.recv().await else {
            panic!("expected binary frame");
        };
        let Ok(decoded) = PublishEvent::from_frame(&frame) else {
            panic!("frame did not decode");
        };
        assert_eq!(decoded, event);

        let _ = in_tx.send(Ok(Message::Close(None)));
        let Ok(reason) = session.await else {
            panic!("session task failed");
        };
        assert_eq!(reason, CloseReason::PeerClosed);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_missing_pong_times_out() {
        let hub = hub();
        let subscriber = hub.register();
        let id = subscriber.id();
        let (out_tx, mut out_rx) = capture_sink();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();

        let keepalive = KeepaliveConfig::from_pong_wait(Duration::from_millis(100));
        let reason = run_session(
            out_tx,
            inbound_stream(in_rx),
            subscriber,
            Arc::clone(&hub),
            keepalive,
        )
        .await;

        assert_eq!(reason, CloseReason::PongTimeout);
        assert!(!hub.contains(id));
        let Some(Message::Ping(_)) = out_rx.recv().await else {
            panic!("expected a ping before the timeout");
        };
    }

    #[tokio::test]
    async fn test_pongs_keep_session_alive() {
        let hub = hub();
        let subscriber = hub.register();
        let (out_tx, _out_rx) = capture_sink();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let keepalive = KeepaliveConfig::from_pong_wait(Duration::from_millis(150));
        let session = tokio::spawn(run_session(
            out_tx,
            inbound_stream(in_rx),
            subscriber,
            Arc::clone(&hub),
            keepalive,
        ));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = in_tx.send(Ok(Message::Pong(Bytes::new())));
        }
        assert_eq!(hub.len(), 1);

        let _ = in_tx.send(Ok(Message::Close(None)));
        let Ok(reason) = session.await else {
            panic!("session task failed");
        };
        assert_eq!(reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_hub_shutdown_sends_close_frame() {
        let hub = hub();
        let subscriber = hub.register();
        let (out_tx, mut out_rx) = capture_sink();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();

        let session = tokio::spawn(run_session(
            out_tx,
            inbound_stream(in_rx),
            subscriber,
            Arc::clone(&hub),
            slow_keepalive(),
        ));
        hub.shutdown();

        let Ok(reason) = session.await else {
            panic!("session task failed");
        };
        assert_eq!(reason, CloseReason::HubClosed);
        let Some(Message::Close(_)) = out_rx.recv().await else {
            panic!("expected close frame");
        };
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_unregisters() {
        let hub = hub();
        let subscriber = hub.register();
        let (out_tx, _out_rx) = capture_sink();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = in_tx.send(Err(axum::Error::new(std::io::Error::other("reset"))));

        let reason = run_session(
            out_tx,
            inbound_stream(in_rx),
            subscriber,
            Arc::clone(&hub),
            slow_keepalive(),
        )
        .await;

        assert_eq!(reason, CloseReason::ReadFailed);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_write_error_ends_session() {
        let hub = hub();
        let subscriber = hub.register();
        let failing = Box::pin(sink::unfold((), |(), _msg: Message| async {
            Err::<(), _>(std::io::Error::other("broken pipe"))
        }));
        let (_in_tx, in_rx) = mpsc::unbounded_channel();

        let session = tokio::spawn(run_session(
            failing,
            inbound_stream(in_rx),
            subscriber,
            Arc::clone(&hub),
            slow_keepalive(),
        ));
        let report = hub.broadcast(&PublishEvent::new("oci://ghcr.io/acme/app", "v3"));
        assert_eq!(report.delivered, 1);

        let Ok(reason) = session.await else {
            panic!("session task failed");
        };
        assert_eq!(reason, CloseReason::WriteFailed);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_transport_failure_keeps_reason() {
        let id = SubscriberId::new();
        let err = RelayError::Transport("encoding event: key must be a string".to_string());
        assert_eq!(
            transport_failure(id, CloseReason::EncodeFailed, &err),
            CloseReason::EncodeFailed
        );
        assert_eq!(err.error_code(), 2001);
    }
}
