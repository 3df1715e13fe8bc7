//! Inventory of reconcilable sources.
//!
//! The inventory is an external system of record (Flux `OCIRepository`
//! objects in Kubernetes). The relay only lists entries and patches a
//! single annotation on them, through the [`Inventory`] trait.

pub mod flux;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use flux::FluxInventory;
pub use memory::InMemoryInventory;

/// One reconcilable source as seen by the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryItem {
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// Image repository URL the source follows (`oci://...`).
    pub source_url: String,
    /// Tag the source follows; empty when it tracks something else.
    pub source_tag: String,
    /// Current object annotations.
    pub annotations: BTreeMap<String, String>,
}

impl InventoryItem {
    /// Returns `true` if the item follows exactly `image_url` at `tag`.
    #[must_use]
    pub fn matches(&self, image_url: &str, tag: &str) -> bool {
        self.source_url == image_url && self.source_tag == tag
    }
}

/// Inventory call failures.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The HTTP request could not be sent or its body not read.
    #[error("inventory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The inventory answered with a non-success status.
    #[error("inventory returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response could not be decoded.
    #[error("invalid inventory response: {0}")]
    Decode(String),

    /// The inventory client could not be built or is unavailable.
    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// Query/patch interface over the external inventory.
///
/// Both calls are fallible and network-bound; implementations own their
/// timeout and retry policy.
#[async_trait]
pub trait Inventory: Send + Sync + std::fmt::Debug {
    /// Lists every item across all namespaces.
    ///
    /// # Errors
    ///
    /// Returns an [`InventoryError`] if the listing fails.
    async fn list(&self) -> Result<Vec<InventoryItem>, InventoryError>;

    /// Sets annotation `key` to `value` on the item `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns an [`InventoryError`] if the patch is rejected or fails.
    async fn patch_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), InventoryError>;
}
