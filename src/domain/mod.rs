//! Domain layer: publish events, webhook payloads, and the subscriber hub.
//!
//! This module contains the relay's in-memory model: the normalized
//! [`PublishEvent`], the classified [`WebhookPayload`], subscriber
//! identity, and the [`SubscriberHub`] that fans events out to live
//! connections.

pub mod hub;
pub mod publish_event;
pub mod subscriber_id;
pub mod webhook_payload;

pub use hub::{BroadcastReport, Subscriber, SubscriberGuard, SubscriberHub};
pub use publish_event::PublishEvent;
pub use subscriber_id::SubscriberId;
pub use webhook_payload::{PublishedPackage, WebhookPayload};
