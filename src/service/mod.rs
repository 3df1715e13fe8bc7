//! Service layer: business logic orchestration.
//!
//! [`RelayService`] dispatches accepted publish events to the
//! [`crate::domain::SubscriberHub`] and the [`ReconciliationMatcher`].

pub mod reconciler;
pub mod relay_service;

pub use reconciler::{MatchReport, RECONCILE_REQUEST_ANNOTATION, ReconciliationMatcher};
pub use relay_service::{DispatchReport, RelayService};
