//! Webhook payload decoding and classification.
//!
//! GitHub delivers many event shapes to the same endpoint. The body is
//! decoded into a permissive [`RawWebhookPayload`] (every field optional,
//! unknown fields ignored) and then classified into a [`WebhookPayload`]
//! by testing the strict "container published" shape before the looser
//! "ping" shape.

use serde::Deserialize;

use super::PublishEvent;
use crate::error::RelayError;

/// Permissive view over a webhook body.
///
/// Fields that are present must have the expected JSON type; a type
/// mismatch is a decode error rather than an unrecognized payload.
#[derive(Debug, Default, Deserialize)]
pub struct RawWebhookPayload {
    /// Event action, `"published"` for package pushes.
    #[serde(default)]
    pub action: Option<String>,
    /// Package description for `registry_package` events.
    #[serde(default)]
    pub registry_package: Option<RawRegistryPackage>,
    /// Hook identifier carried by ping deliveries.
    #[serde(default)]
    pub hook_id: Option<u64>,
}

/// `registry_package` object of a package event.
#[derive(Debug, Default, Deserialize)]
pub struct RawRegistryPackage {
    /// Package name.
    #[serde(default)]
    pub name: Option<String>,
    /// Owner namespace (user or organization).
    #[serde(default)]
    pub namespace: Option<String>,
    /// Package ecosystem, `"CONTAINER"` for images.
    #[serde(default)]
    pub package_type: Option<String>,
    /// Version being published.
    #[serde(default)]
    pub package_version: Option<RawPackageVersion>,
}

/// `package_version` object of a package event.
#[derive(Debug, Default, Deserialize)]
pub struct RawPackageVersion {
    /// Container-specific metadata.
    #[serde(default)]
    pub container_metadata: Option<RawContainerMetadata>,
}

/// `container_metadata` object of a package version.
#[derive(Debug, Default, Deserialize)]
pub struct RawContainerMetadata {
    /// Tag that was pushed.
    #[serde(default)]
    pub tag: Option<RawTag>,
}

/// `tag` object of the container metadata.
#[derive(Debug, Default, Deserialize)]
pub struct RawTag {
    /// Tag name.
    #[serde(default)]
    pub name: Option<String>,
}

/// A validated container publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPackage {
    /// Owner namespace.
    pub namespace: String,
    /// Package name.
    pub name: String,
    /// Published tag.
    pub tag: String,
}

impl PublishedPackage {
    /// Converts the package into the relay event for `registry_host`.
    #[must_use]
    pub fn to_event(&self, registry_host: &str) -> PublishEvent {
        PublishEvent::for_package(registry_host, &self.namespace, &self.name, &self.tag)
    }
}

/// Classified webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookPayload {
    /// A container image was published.
    Published(PublishedPackage),
    /// GitHub liveness ping sent when the hook is created.
    Ping {
        /// Non-zero hook identifier.
        hook_id: u64,
    },
    /// Any other event; acknowledged and ignored.
    Unrecognized,
}

impl WebhookPayload {
    /// Decodes and classifies a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BadRequest`] if the body is not a JSON object
    /// or a known field has the wrong type.
    pub fn decode(body: &[u8]) -> Result<Self, RelayError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| RelayError::BadRequest(format!("malformed JSON: {e}")))?;
        if !value.is_object() {
            return Err(RelayError::BadRequest(
                "payload must be a JSON object".to_string(),
            ));
        }
        let raw = RawWebhookPayload::deserialize(value)
            .map_err(|e| RelayError::BadRequest(format!("malformed payload: {e}")))?;
        Ok(Self::classify(raw))
    }

    /// Classifies a decoded payload, strictest shape first.
    #[must_use]
    pub fn classify(raw: RawWebhookPayload) -> Self {
        if let Some(package) = published_package(&raw) {
            return Self::Published(package);
        }
        match raw.hook_id {
            Some(hook_id) if hook_id != 0 => Self::Ping { hook_id },
            _ => Self::Unrecognized,
        }
    }

    /// Returns the classification as a static string slice.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Published(_) => "published",
            Self::Ping { .. } => "ping",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Extracts the package if `raw` satisfies the "container published" shape.
fn published_package(raw: &RawWebhookPayload) -> Option<PublishedPackage> {
    if raw.action.as_deref() != Some("published") {
        return None;
    }
    let package = raw.registry_package.as_ref()?;
    if package.package_type.as_deref() != Some("CONTAINER") {
        return None;
    }
    let name = non_empty(package.name.as_deref())?;
    let namespace = non_empty(package.namespace.as_deref())?;
    let tag = package
        .package_version
        .as_ref()?
        .container_metadata
        .as_ref()?
        .tag
        .as_ref()?
        .name
        .as_deref();
    let tag = non_empty(tag)?;

    Some(PublishedPackage {
        namespace: namespace.to_string(),
        name: name.to_string(),
        tag: tag.to_string(),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
