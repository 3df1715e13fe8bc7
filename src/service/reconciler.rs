//! Reconciliation matcher: maps a publish event to inventory patches.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};

use crate::domain::PublishEvent;
use crate::inventory::Inventory;
use crate::metrics::{Outcome, RelayMetrics};

/// Annotation Flux watches to trigger an out-of-band reconciliation.
pub const RECONCILE_REQUEST_ANNOTATION: &str = "reconcile.fluxcd.io/requestedAt";

/// Summary of one [`ReconciliationMatcher::reconcile`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchReport {
    /// Items whose URL and tag matched the event.
    pub matched: usize,
    /// Matched items patched successfully.
    pub patched: usize,
    /// Matched items whose patch failed.
    pub failed: usize,
    /// `true` if the inventory could not be listed.
    pub listing_failed: bool,
}

/// Requests reconciliation of every inventory item following an image tag.
///
/// Stateless: each call lists the live inventory, so there is no cache to
/// invalidate. Patch failures are isolated per item and never escalate.
#[derive(Debug, Clone)]
pub struct ReconciliationMatcher {
    inventory: Arc<dyn Inventory>,
    metrics: Arc<RelayMetrics>,
}

impl ReconciliationMatcher {
    /// Creates a matcher over `inventory`.
    #[must_use]
    pub fn new(inventory: Arc<dyn Inventory>, metrics: Arc<RelayMetrics>) -> Self {
        Self { inventory, metrics }
    }

    /// Reconciles the items matching `event`.
    pub async fn reconcile_event(&self, event: &PublishEvent) -> MatchReport {
        self.reconcile(&event.image_url, &event.tag).await
    }

    /// Lists the inventory and patches the request annotation on every
    /// item with `source_url == image_url` and `source_tag == tag`.
    ///
    /// A listing failure is logged once and the event is skipped; the next
    /// call lists afresh.
    pub async fn reconcile(&self, image_url: &str, tag: &str) -> MatchReport {
        let mut report = MatchReport::default();

        let items = match self.inventory.list().await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, image_url, tag, "failed to list inventory");
                report.listing_failed = true;
                return report;
            }
        };

        for item in items.iter().filter(|item| item.matches(image_url, tag)) {
            report.matched += 1;
            let requested_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
            tracing::info!(
                name = %item.name,
                namespace = %item.namespace,
                image_url,
                tag,
                "requesting reconciliation"
            );

            match self
                .inventory
                .patch_annotation(
                    &item.namespace,
                    &item.name,
                    RECONCILE_REQUEST_ANNOTATION,
                    &requested_at,
                )
                .await
            {
                Ok(()) => {
                    report.patched += 1;
                    self.metrics
                        .record_reconciliation(&item.name, &item.namespace, Outcome::Success);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        error = %e,
                        name = %item.name,
                        namespace = %item.namespace,
                        "failed to annotate source"
                    );
                    self.metrics
                        .record_reconciliation(&item.name, &item.namespace, Outcome::Fail);
                }
            }
        }

        if report.matched == 0 {
            tracing::debug!(image_url, tag, "no inventory item matches");
        }
        report
    }
}
