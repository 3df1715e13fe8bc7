//! Relay service: dispatches accepted publish events.

use std::sync::Arc;

use crate::domain::{BroadcastReport, PublishEvent, PublishedPackage, SubscriberHub};
use crate::service::reconciler::{MatchReport, ReconciliationMatcher};

/// Outcome of dispatching one publish event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// The normalized event that was dispatched.
    pub event: PublishEvent,
    /// Fan-out result.
    pub broadcast: BroadcastReport,
    /// Local reconciliation result.
    pub reconcile: MatchReport,
}

/// Orchestration layer for server mode.
///
/// Owns the [`SubscriberHub`] for fan-out and the
/// [`ReconciliationMatcher`] for the local trigger. Every publish follows
/// the same pattern: normalize → broadcast → reconcile.
#[derive(Debug, Clone)]
pub struct RelayService {
    hub: Arc<SubscriberHub>,
    matcher: Arc<ReconciliationMatcher>,
    registry_host: String,
}

impl RelayService {
    /// Creates a new `RelayService`.
    #[must_use]
    pub fn new(
        hub: Arc<SubscriberHub>,
        matcher: Arc<ReconciliationMatcher>,
        registry_host: impl Into<String>,
    ) -> Self {
        Self {
            hub,
            matcher,
            registry_host: registry_host.into(),
        }
    }

    /// Returns a reference to the inner [`SubscriberHub`].
    #[must_use]
    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    /// Returns a reference to the inner [`ReconciliationMatcher`].
    #[must_use]
    pub fn matcher(&self) -> &Arc<ReconciliationMatcher> {
        &self.matcher
    }

    /// Normalizes a published package and dispatches it.
    pub async fn publish_package(&self, package: &PublishedPackage) -> DispatchReport {
        self.publish(package.to_event(&self.registry_host)).await
    }

    /// Broadcasts `event` to subscribers, then reconciles it locally.
    pub async fn publish(&self, event: PublishEvent) -> DispatchReport {
        tracing::info!(image_url = %event.image_url, tag = %event.tag, "dispatching publish event");
        let broadcast = self.hub.broadcast(&event);
        let reconcile = self.matcher.reconcile_event(&event).await;
        DispatchReport {
            event,
            broadcast,
            reconcile,
        }
    }
}
