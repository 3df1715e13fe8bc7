//! Registry and fan-out point for live subscriber connections.
//!
//! [`SubscriberHub`] owns one bounded outbox sender per subscriber behind a
//! single `parking_lot::Mutex`. Registration, unregistration and broadcast
//! all take the same lock, so membership changes are serialized and a
//! broadcast sees a consistent set of recipients. Broadcast only performs
//! non-blocking `try_send` calls while holding the lock; network writes
//! happen in the per-connection workers that drain the outboxes.
//!
//! # Overflow policy
//!
//! A subscriber whose outbox is full (or already closed) when a broadcast
//! arrives is evicted: it is removed from the registry, its outbox sender
//! is dropped and its close token is cancelled so the worker tears the
//! connection down. Slow consumers never stall the broadcaster.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::{PublishEvent, SubscriberId};
use crate::metrics::RelayMetrics;

/// Default capacity of a subscriber outbox.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Hub-side half of a subscriber.
#[derive(Debug)]
struct Outbox {
    sender: mpsc::Sender<PublishEvent>,
    closed: CancellationToken,
}

/// Worker-side half of a registered subscriber.
///
/// Holds the receiving end of the outbox and the token the hub cancels
/// when the subscriber is unregistered or the hub shuts down.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    outbox: mpsc::Receiver<PublishEvent>,
    closed: CancellationToken,
}

impl Subscriber {
    /// Identifier allocated at registration.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receives the next queued event.
    ///
    /// Returns `None` once the hub dropped the outbox and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<PublishEvent> {
        self.outbox.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<PublishEvent> {
        self.outbox.try_recv().ok()
    }

    /// Token cancelled when the hub wants this connection closed.
    #[must_use]
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Returns `true` once the hub asked the connection to close.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Result of a single [`SubscriberHub::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers whose outbox accepted the event.
    pub delivered: usize,
    /// Subscribers evicted because their outbox was full or closed.
    pub dropped: usize,
}

/// Concurrent-safe set of active subscribers.
#[derive(Debug)]
pub struct SubscriberHub {
    subscribers: Mutex<HashMap<SubscriberId, Outbox>>,
    outbox_capacity: usize,
    shutdown: CancellationToken,
    metrics: Arc<RelayMetrics>,
}

impl SubscriberHub {
    /// Creates an empty hub.
    ///
    /// Every subscriber close token is a child of `shutdown`, so cancelling
    /// it closes all connections. A zero `outbox_capacity` is raised to 1.
    #[must_use]
    pub fn new(
        outbox_capacity: usize,
        metrics: Arc<RelayMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            outbox_capacity: outbox_capacity.max(1),
            shutdown,
            metrics,
        }
    }

    /// Registers a new subscriber with a fresh id and bounded outbox.
    pub fn register(&self) -> Subscriber {
        let id = SubscriberId::new();
        let (sender, receiver) = mpsc::channel(self.outbox_capacity);
        let closed = self.shutdown.child_token();

        self.subscribers.lock().insert(
            id,
            Outbox {
                sender,
                closed: closed.clone(),
            },
        );
        self.metrics.client_connected();
        tracing::info!(subscriber_id = %id, "subscriber registered");

        Subscriber {
            id,
            outbox: receiver,
            closed,
        }
    }

    /// Removes a subscriber, closing its outbox.
    ///
    /// Returns `false` if the subscriber was already gone; calling this
    /// more than once is harmless.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id);
        match removed {
            Some(outbox) => {
                outbox.closed.cancel();
                self.metrics.client_disconnected();
                tracing::info!(subscriber_id = %id, "subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// Queues `event` for every registered subscriber.
    ///
    /// Never waits on a subscriber: full or closed outboxes get their
    /// subscriber evicted within the same critical section.
    pub fn broadcast(&self, event: &PublishEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut map = self.subscribers.lock();

        let mut evicted = Vec::new();
        for (id, outbox) in map.iter() {
            match outbox.sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = %id, "subscriber outbox full, disconnecting");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber_id = %id, "subscriber outbox closed");
                    evicted.push(*id);
                }
            }
        }

        for id in &evicted {
            if let Some(outbox) = map.remove(id) {
                outbox.closed.cancel();
                self.metrics.client_disconnected();
            }
        }
        drop(map);

        report.dropped = evicted.len();
        tracing::debug!(
            image_url = %event.image_url,
            tag = %event.tag,
            delivered = report.delivered,
            dropped = report.dropped,
            "event broadcast"
        );
        report
    }

    /// Asks every connection to close.
    ///
    /// Workers unregister themselves as they exit; subscribers registered
    /// afterwards are closed immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns `true` once [`SubscriberHub::shutdown`] was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns `true` if the subscriber is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns `true` if no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

/// Unregisters a subscriber when dropped.
///
/// Held by the connection worker so every exit path, including panics and
/// task cancellation, removes the subscriber from the hub.
#[derive(Debug)]
pub struct SubscriberGuard {
    hub: Arc<SubscriberHub>,
    id: SubscriberId,
}

impl SubscriberGuard {
    /// Creates a guard for `id`.
    #[must_use]
    pub fn new(hub: Arc<SubscriberHub>, id: SubscriberId) -> Self {
        Self { hub, id }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn make_hub(capacity: usize) -> (Arc<SubscriberHub>, Arc<RelayMetrics>) {
        let metrics = Arc::new(RelayMetrics::new(Mode::Server));
        let hub = Arc::new(SubscriberHub::new(
            capacity,
            Arc::clone(&metrics),
            CancellationToken::new(),
        ));
        (hub, metrics)
    }

    fn event(tag: &str) -> PublishEvent {
        PublishEvent::new("oci://ghcr.io/acme/api", tag)
    }

    #[test]
    fn register_and_unregister_track_gauge() {
        let (hub, metrics) = make_hub(4);
        let a = hub.register();
        let b = hub.register();
        assert_eq!(hub.len(), 2);
        assert_eq!(metrics.clients_connected(), 2);

        assert!(hub.unregister(a.id()));
        assert!(!hub.contains(a.id()));
        assert!(hub.contains(b.id()));
        assert_eq!(metrics.clients_connected(), 1);
    }

    #[test]
    fn double_unregister_is_noop() {
        let (hub, metrics) = make_hub(4);
        let sub = hub.register();
        assert!(hub.unregister(sub.id()));
        assert!(!hub.unregister(sub.id()));
        assert_eq!(metrics.clients_connected(), 0);
        assert!(hub.is_empty());
    }

    #[test]
    fn unregister_closes_outbox_and_signals_worker() {
        let (hub, _) = make_hub(4);
        let mut sub = hub.register();
        hub.unregister(sub.id());
        assert!(sub.is_closed());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_subscriber() {
        let (hub, _) = make_hub(4);
        let mut subs: Vec<Subscriber> = (0..3).map(|_| hub.register()).collect();

        let report = hub.broadcast(&event("v1"));
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 3,
                dropped: 0
            }
        );
        for sub in &mut subs {
            assert_eq!(sub.recv().await, Some(event("v1")));
        }
    }

    #[test]
    fn late_subscriber_misses_earlier_broadcast() {
        let (hub, _) = make_hub(4);
        let _early = hub.register();
        hub.broadcast(&event("v1"));
        let mut late = hub.register();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn unregistered_subscriber_keeps_only_prior_events() {
        let (hub, _) = make_hub(4);
        let mut sub = hub.register();
        hub.broadcast(&event("v1"));
        hub.unregister(sub.id());
        let report = hub.broadcast(&event("v2"));
        assert_eq!(report.delivered, 0);

        assert_eq!(sub.try_recv(), Some(event("v1")));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn full_outbox_evicts_slow_subscriber() {
        let (hub, metrics) = make_hub(1);
        let slow = hub.register();
        let mut fast = hub.register();

        let first = hub.broadcast(&event("v1"));
        assert_eq!(first.delivered, 2);
        assert_eq!(fast.try_recv(), Some(event("v1")));

        // slow never drained its outbox
        let second = hub.broadcast(&event("v2"));
        assert_eq!(
            second,
            BroadcastReport {
                delivered: 1,
                dropped: 1
            }
        );
        assert!(!hub.contains(slow.id()));
        assert!(slow.is_closed());
        assert_eq!(metrics.clients_connected(), 1);

        assert_eq!(fast.try_recv(), Some(event("v2")));
        let third = hub.broadcast(&event("v3"));
        assert_eq!(third.delivered, 1);
        assert_eq!(third.dropped, 0);
    }

    #[test]
    fn dropped_receiver_is_evicted() {
        let (hub, metrics) = make_hub(4);
        let sub = hub.register();
        let id = sub.id();
        drop(sub);

        let report = hub.broadcast(&event("v1"));
        assert_eq!(report.dropped, 1);
        assert!(!hub.contains(id));
        assert_eq!(metrics.clients_connected(), 0);
    }

    #[test]
    fn guard_unregisters_on_drop() {
        let (hub, metrics) = make_hub(4);
        let sub = hub.register();
        {
            let _guard = SubscriberGuard::new(Arc::clone(&hub), sub.id());
        }
        assert!(!hub.contains(sub.id()));
        assert_eq!(metrics.clients_connected(), 0);
    }

    #[test]
    fn shutdown_closes_current_and_future_subscribers() {
        let (hub, _) = make_hub(4);
        let before = hub.register();
        hub.shutdown();
        assert!(hub.is_shutting_down());
        assert!(before.is_closed());
        let after = hub.register();
        assert!(after.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_membership_changes_are_consistent() {
        let (hub, metrics) = make_hub(8);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let hub = Arc::clone(&hub);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let sub = hub.register();
                    hub.broadcast(&PublishEvent::new("oci://x/y/z", format!("v{i}")));
                    hub.unregister(sub.id());
                    hub.unregister(sub.id());
                }
            }));
        }
        for handle in handles {
            let Ok(()) = handle.await else {
                panic!("task failed");
            };
        }
        assert!(hub.is_empty());
        assert_eq!(metrics.clients_connected(), 0);
    }
}
