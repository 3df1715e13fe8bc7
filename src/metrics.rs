//! Prometheus metrics of the relay.
//!
//! [`RelayMetrics`] owns the metric families and the `prometheus_client`
//! registry they are exported through. It is shared via `Arc` between the
//! hub, the matcher, the webhook handler and the relay client. Only the
//! families relevant to the process [`Mode`] are registered: subscriber and
//! webhook metrics in server mode, message and connection metrics in client
//! mode, reconciliations in both.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::config::Mode;

/// Prefix of every exported metric name.
pub const METRICS_NAMESPACE: &str = "flux_reconciler";

/// Success/failure label attached to outcome counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    /// The operation completed.
    Success,
    /// The operation failed.
    Fail,
}

impl Outcome {
    /// Returns the label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl EncodeLabelValue for Outcome {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> Result<(), std::fmt::Error> {
        EncodeLabelValue::encode(&self.as_str(), encoder)
    }
}

/// Labels of the status-only counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct StatusLabels {
    /// Outcome of the counted operation.
    pub status: Outcome,
}

/// Labels of a reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Inventory item name.
    pub name: String,
    /// Inventory item namespace.
    pub namespace: String,
    /// Outcome of the patch.
    pub status: Outcome,
}

/// Counters and gauges exported by the relay.
#[derive(Debug)]
pub struct RelayMetrics {
    registry: Registry,
    clients_connected: Gauge,
    connection_attempts: Counter,
    webhooks_handled: Family<StatusLabels, Counter>,
    processed_messages: Family<StatusLabels, Counter>,
    reconciliations: Family<ReconcileLabels, Counter>,
    reconciliation_outcomes: Family<StatusLabels, Counter>,
}

impl RelayMetrics {
    /// Creates the families and registers those exported in `mode`.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        let mut registry = Registry::with_prefix(METRICS_NAMESPACE);
        let clients_connected = Gauge::default();
        let connection_attempts = Counter::default();
        let webhooks_handled = Family::<StatusLabels, Counter>::default();
        let processed_messages = Family::<StatusLabels, Counter>::default();
        let reconciliations = Family::<ReconcileLabels, Counter>::default();

        registry.register(
            "reconciliations",
            "The total number of reconciliations",
            reconciliations.clone(),
        );
        match mode {
            Mode::Server => {
                registry.register(
                    "clients_connected",
                    "The current number of connected subscribers",
                    clients_connected.clone(),
                );
                registry.register(
                    "webhooks_handled",
                    "The total number of handled webhooks",
                    webhooks_handled.clone(),
                );
            }
            Mode::Client => {
                registry.register(
                    "processed_messages",
                    "The total number of processed messages",
                    processed_messages.clone(),
                );
                registry.register(
                    "connection_attempts",
                    "The total number of connection attempts",
                    connection_attempts.clone(),
                );
            }
        }

        Self {
            registry,
            clients_connected,
            connection_attempts,
            webhooks_handled,
            processed_messages,
            reconciliations,
            reconciliation_outcomes: Family::default(),
        }
    }

    /// Increments the connected-subscriber gauge.
    pub fn client_connected(&self) {
        self.clients_connected.inc();
    }

    /// Decrements the connected-subscriber gauge.
    pub fn client_disconnected(&self) {
        self.clients_connected.dec();
    }

    /// Current value of the connected-subscriber gauge.
    #[must_use]
    pub fn clients_connected(&self) -> i64 {
        self.clients_connected.get()
    }

    /// Records one dial attempt of the relay client.
    pub fn record_connection_attempt(&self) {
        self.connection_attempts.inc();
    }

    /// Total dial attempts so far.
    #[must_use]
    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts.get()
    }

    /// Records the outcome of one webhook request.
    pub fn record_webhook(&self, outcome: Outcome) {
        self.webhooks_handled
            .get_or_create(&StatusLabels { status: outcome })
            .inc();
    }

    /// Webhook requests handled with the given outcome.
    #[must_use]
    pub fn webhooks_handled(&self, outcome: Outcome) -> u64 {
        self.webhooks_handled
            .get_or_create(&StatusLabels { status: outcome })
            .get()
    }

    /// Records the outcome of one relayed message.
    pub fn record_message(&self, outcome: Outcome) {
        self.processed_messages
            .get_or_create(&StatusLabels { status: outcome })
            .inc();
    }

    /// Relayed messages processed with the given outcome.
    #[must_use]
    pub fn messages_processed(&self, outcome: Outcome) -> u64 {
        self.processed_messages
            .get_or_create(&StatusLabels { status: outcome })
            .get()
    }

    /// Records one reconciliation attempt for an inventory item.
    pub fn record_reconciliation(&self, name: &str, namespace: &str, outcome: Outcome) {
        let labels = ReconcileLabels {
            name: name.to_string(),
            namespace: namespace.to_string(),
            status: outcome,
        };
        self.reconciliations.get_or_create(&labels).inc();
        self.reconciliation_outcomes
            .get_or_create(&StatusLabels { status: outcome })
            .inc();
    }

    /// Reconciliation attempts with the given outcome, across all items.
    #[must_use]
    pub fn reconciliations(&self, outcome: Outcome) -> u64 {
        self.reconciliation_outcomes
            .get_or_create(&StatusLabels { status: outcome })
            .get()
    }

    /// Encodes the registered families in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`std::fmt::Error`] if encoding fails.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
