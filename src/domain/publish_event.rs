//! Normalized "image published" notification.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An `(image_url, tag)` pair announced by the registry.
///
/// Serialized on the subscription wire as `{"oci_url": ..., "tag": ...}`.
/// Equality is value equality on both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PublishEvent {
    /// Full `oci://` URL of the image repository.
    #[serde(rename = "oci_url")]
    pub image_url: String,
    /// Published tag.
    pub tag: String,
}

impl PublishEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(image_url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            tag: tag.into(),
        }
    }

    /// Builds the event for a container package pushed to `registry_host`.
    ///
    /// The image URL is `oci://<registry_host>/<namespace>/<name>`.
    #[must_use]
    pub fn for_package(registry_host: &str, namespace: &str, name: &str, tag: &str) -> Self {
        Self::new(format!("oci://{registry_host}/{namespace}/{name}"), tag)
    }

    /// Encodes the event as a JSON wire frame.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_frame(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes an event from a JSON wire frame.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the bytes are not a JSON object
    /// with string `oci_url` and `tag` fields.
    pub fn from_frame(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Display for PublishEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image_url, self.tag)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn for_package_builds_oci_url() {
        let event = PublishEvent::for_package("ghcr.io", "acme", "api", "v2");
        assert_eq!(event.image_url, "oci://ghcr.io/acme/api");
        assert_eq!(event.tag, "v2");
        assert_eq!(event.to_string(), "oci://ghcr.io/acme/api:v2");
    }

    #[test]
    fn frame_uses_wire_field_names() {
        let event = PublishEvent::new("oci://registry/ns/name", "v1");
        let Ok(frame) = event.to_frame() else {
            panic!("serialization failed");
        };
        let Ok(json) = serde_json::from_slice::<serde_json::Value>(&frame) else {
            panic!("frame is not json");
        };
        assert_eq!(json["oci_url"], "oci://registry/ns/name");
        assert_eq!(json["tag"], "v1");
    }

    #[test]
    fn from_frame_rejects_malformed_input() {
        assert!(PublishEvent::from_frame(b"not json").is_err());
        assert!(PublishEvent::from_frame(br#"{"oci_url": 1, "tag": "x"}"#).is_err());
        assert!(PublishEvent::from_frame(br#"{"tag": "x"}"#).is_err());
    }

    #[test]
    fn equality_is_by_value() {
        assert_eq!(PublishEvent::new("a", "b"), PublishEvent::new("a", "b"));
        assert_ne!(PublishEvent::new("a", "b"), PublishEvent::new("a", "c"));
    }
}
