//! Client mode: subscribe to a remote relay server and reconcile every
//! received event against the local inventory.

pub mod connector;
pub mod dialer;

pub use connector::{ConnectionState, ConnectorOutcome, ConnectorStatus, ResilientConnector};
pub use dialer::{Dialer, FrameStream, WsDialer};
