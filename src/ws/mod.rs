//! WebSocket layer for the `/subscribe` endpoint.
//!
//! Authorized peers are upgraded, registered with the
//! [`SubscriberHub`](crate::domain::SubscriberHub) and served by a
//! dedicated worker that writes publish events as binary JSON frames and
//! enforces the ping/pong keepalive.

pub mod connection;
pub mod handler;
