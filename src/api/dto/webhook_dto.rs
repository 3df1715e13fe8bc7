//! Webhook acknowledgement DTO.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of a `200` webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    /// Always `"accepted"`.
    pub status: String,
    /// Payload classification: `published`, `ping` or `unrecognized`.
    pub kind: String,
}

impl WebhookAck {
    /// Builds an acknowledgement for a payload of the given kind.
    #[must_use]
    pub fn accepted(kind: &str) -> Self {
        Self {
            status: "accepted".to_string(),
            kind: kind.to_string(),
        }
    }
}
