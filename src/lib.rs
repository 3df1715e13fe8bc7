//! # flux-relay
//!
//! Webhook relay that turns GitHub container package events into Flux
//! `OCIRepository` reconciliations, locally and across clusters.
//!
//! In **server** mode the relay verifies signed `registry_package`
//! webhooks, fans each published tag out to every WebSocket subscriber and
//! annotates the matching local sources. In **client** mode it subscribes
//! to a remote server and performs only the local reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! GitHub ──► /webhook (api/)            remote server
//!               │                             │
//!               ▼                             ▼
//!          RelayService (service/)     ResilientConnector (client/)
//!            │        │                       │
//!            │        └──► ReconciliationMatcher ◄┘
//!            ▼                    │
//!     SubscriberHub (domain/)     ▼
//!            │             Inventory (inventory/) ──► Kubernetes API
//!            ▼
//!     /subscribe workers (ws/) ──► subscribers
//! ```

pub mod api;
pub mod app_state;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod service;
pub mod signature;
pub mod ws;
