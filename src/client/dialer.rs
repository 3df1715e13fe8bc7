//! Outbound WebSocket dialing for client mode.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use crate::config::ConfigError;
use crate::error::RelayError;

/// Query parameter carrying the subscription secret.
pub const AUTH_SECRET_PARAM: &str = "authSecret";

/// Inbound frames of an established session.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Opens sessions to the remote server.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Establishes one session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connect`] if the handshake fails.
    async fn dial(&self) -> Result<FrameStream, RelayError>;
}

/// [`Dialer`] backed by `tokio-tungstenite`.
///
/// Ping frames from the server are answered automatically while the
/// stream is polled.
#[derive(Clone)]
pub struct WsDialer {
    endpoint: Url,
}

impl WsDialer {
    /// Builds a dialer for `endpoint`, appending `authSecret` when the
    /// secret is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `endpoint` is not a
    /// `ws://` or `wss://` URL.
    pub fn new(endpoint: &str, auth_secret: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "SERVER_ENDPOINT",
            value: endpoint.to_string(),
        };
        let mut url = Url::parse(endpoint).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid());
        }
        if !auth_secret.is_empty() {
            url.query_pairs_mut()
                .append_pair(AUTH_SECRET_PARAM, auth_secret);
        }
        Ok(Self { endpoint: url })
    }

    /// Full connect URL, secret included.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Connect URL without its query string, safe to log.
    #[must_use]
    pub fn redacted(&self) -> String {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        url.to_string()
    }
}

impl fmt::Debug for WsDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsDialer")
            .field("endpoint", &self.redacted())
            .finish()
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<FrameStream, RelayError> {
        let (stream, response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        tracing::debug!(
            endpoint = %self.redacted(),
            status = %response.status(),
            "websocket handshake complete"
        );
        Ok(Box::pin(stream))
    }
}
