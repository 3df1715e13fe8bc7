//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Empty secrets disable the matching
//! authentication check; [`RelayConfig::security_warnings`] lists them so
//! the process can log a warning at startup.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default in-cluster service-account token path.
pub const DEFAULT_KUBE_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Default in-cluster service-account CA bundle path.
pub const DEFAULT_KUBE_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Configuration errors detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Offending raw value.
        value: String,
    },

    /// Values parsed but are inconsistent with each other.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment mode of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Receives webhooks and serves subscribers.
    Server,
    /// Subscribes to a remote server and reconciles locally.
    Client,
}

impl Mode {
    /// Returns the mode as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            _ => Err(ConfigError::InvalidValue {
                key: "RELAY_MODE",
                value: s.to_string(),
            }),
        }
    }
}

/// Keepalive timing for subscriber connections.
///
/// The server pings every `ping_period` and drops a connection that has
/// not answered with a pong within `pong_wait`. `ping_period` must not
/// exceed 90% of `pong_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Maximum silence allowed from the peer before disconnecting.
    pub pong_wait: Duration,
    /// Interval between server pings.
    pub ping_period: Duration,
}

impl KeepaliveConfig {
    /// Builds a config whose ping period is 9/10 of `pong_wait`.
    ///
    /// `pong_wait` must be non-zero; a zero ping period cannot drive a timer.
    #[must_use]
    pub fn from_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait.saturating_mul(9) / 10,
        }
    }

    /// Builds a config with an explicit ping period.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `ping_period` is zero or longer
    /// than 90% of `pong_wait`.
    pub fn new(pong_wait: Duration, ping_period: Duration) -> Result<Self, ConfigError> {
        if ping_period.is_zero() {
            return Err(ConfigError::Invalid(
                "ping period must be greater than zero".to_string(),
            ));
        }
        // ping_period <= 0.9 * pong_wait, kept in integer arithmetic
        if ping_period.as_nanos().saturating_mul(10) > pong_wait.as_nanos().saturating_mul(9) {
            return Err(ConfigError::Invalid(format!(
                "ping period {ping_period:?} must be at most 90% of pong wait {pong_wait:?}"
            )));
        }
        Ok(Self {
            pong_wait,
            ping_period,
        })
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self::from_pong_wait(Duration::from_secs(10))
    }
}

/// Retry policy of the relay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed connects tolerated before giving up.
    pub max_retries: u32,
    /// Fixed delay between connect attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Settings for the Kubernetes-backed inventory.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Base URL of the Kubernetes API server.
    pub api_url: String,
    /// Bearer token file; ignored when missing.
    pub token_path: String,
    /// CA bundle file; ignored when missing.
    pub ca_path: String,
    /// Per-request timeout of the inventory HTTP client.
    pub request_timeout: Duration,
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Server or client mode.
    pub mode: Mode,

    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Shared secret for `X-Hub-Signature-256`. Empty disables the check.
    pub webhook_secret: String,

    /// Secret expected in the `authSecret` query parameter. Empty disables
    /// the check.
    pub subscribe_secret: String,

    /// WebSocket URL of the remote server (client mode).
    pub server_endpoint: String,

    /// Registry host used to build `oci://` URLs from webhook payloads.
    pub registry_host: String,

    /// Capacity of each subscriber outbox.
    pub outbox_capacity: usize,

    /// Maximum accepted webhook body size in bytes.
    pub max_body_bytes: usize,

    /// Subscriber keepalive timing.
    pub keepalive: KeepaliveConfig,

    /// Client reconnect policy.
    pub retry: RetryPolicy,

    /// Whether to serve `/metrics`.
    pub metrics_enabled: bool,

    /// Socket address of the metrics listener.
    pub metrics_addr: SocketAddr,

    /// Inventory client settings.
    pub inventory: InventoryConfig,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variable is set to an unparseable
    /// value or the resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("RELAY_MODE") {
            Some(raw) => raw.parse()?,
            None => Mode::Server,
        };

        let listen_addr = parse_required(&lookup, "LISTEN_ADDR", "127.0.0.1:3400")?;
        let metrics_addr = parse_required(&lookup, "METRICS_ADDR", "127.0.0.1:9090")?;

        let outbox_capacity: usize = parse_or(&lookup, "OUTBOX_CAPACITY", 64)?;
        if outbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "OUTBOX_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let pong_wait = Duration::from_secs(parse_or(&lookup, "PONG_WAIT_SECS", 10)?);
        if pong_wait.is_zero() {
            return Err(ConfigError::Invalid(
                "PONG_WAIT_SECS must be greater than zero".to_string(),
            ));
        }
        let ping_period = match lookup("PING_PERIOD_MS") {
            Some(raw) => {
                let ms = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "PING_PERIOD_MS",
                    value: raw.clone(),
                })?;
                Duration::from_millis(ms)
            }
            None => KeepaliveConfig::from_pong_wait(pong_wait).ping_period,
        };
        let keepalive = KeepaliveConfig::new(pong_wait, ping_period)?;

        let max_retries: u32 = parse_or(&lookup, "CONNECT_MAX_RETRIES", 5)?;
        if max_retries == 0 {
            return Err(ConfigError::Invalid(
                "CONNECT_MAX_RETRIES must be greater than zero".to_string(),
            ));
        }
        let retry = RetryPolicy {
            max_retries,
            retry_delay: Duration::from_secs(parse_or(&lookup, "CONNECT_RETRY_DELAY_SECS", 5)?),
        };

        let api_url = lookup("KUBE_API_URL").unwrap_or_else(|| {
            match (
                lookup("KUBERNETES_SERVICE_HOST"),
                lookup("KUBERNETES_SERVICE_PORT"),
            ) {
                (Some(host), Some(port)) => format!("https://{host}:{port}"),
                _ => "https://kubernetes.default.svc".to_string(),
            }
        });
        let inventory = InventoryConfig {
            api_url,
            token_path: lookup("KUBE_TOKEN_PATH")
                .unwrap_or_else(|| DEFAULT_KUBE_TOKEN_PATH.to_string()),
            ca_path: lookup("KUBE_CA_PATH").unwrap_or_else(|| DEFAULT_KUBE_CA_PATH.to_string()),
            request_timeout: Duration::from_secs(parse_or(&lookup, "INVENTORY_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            mode,
            listen_addr,
            webhook_secret: lookup("GITHUB_WEBHOOK_SECRET").unwrap_or_default(),
            subscribe_secret: lookup("SUBSCRIBE_SECRET").unwrap_or_default(),
            server_endpoint: lookup("SERVER_ENDPOINT")
                .unwrap_or_else(|| "ws://localhost:3400/subscribe".to_string()),
            registry_host: lookup("REGISTRY_HOST").unwrap_or_else(|| "ghcr.io".to_string()),
            outbox_capacity,
            max_body_bytes: parse_or(&lookup, "MAX_WEBHOOK_BODY_BYTES", 5 * 1024 * 1024)?,
            keepalive,
            retry,
            metrics_enabled: parse_bool(&lookup, "METRICS_ENABLED", false),
            metrics_addr,
            inventory,
        })
    }

    /// Returns one message per authentication check disabled by an empty
    /// secret in the current mode.
    #[must_use]
    pub fn security_warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        match self.mode {
            Mode::Server => {
                if self.webhook_secret.is_empty() {
                    warnings.push(
                        "GITHUB_WEBHOOK_SECRET is empty: webhook signatures are NOT verified",
                    );
                }
                if self.subscribe_secret.is_empty() {
                    warnings.push("SUBSCRIBE_SECRET is empty: any client may subscribe");
                }
            }
            Mode::Client => {
                if self.subscribe_secret.is_empty() {
                    warnings.push("SUBSCRIBE_SECRET is empty: connecting without authSecret");
                }
            }
        }
        warnings
    }
}

/// Parses `key` as `T`, using `default` when unset.
fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

/// Parses `key` as `T`, falling back to parsing `default`.
fn parse_required<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

/// Parses a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}
