//! Flux `OCIRepository` inventory backed by the Kubernetes REST API.
//!
//! Lists `ocirepositories.source.toolkit.fluxcd.io` across all namespaces
//! and requests reconciliation with a JSON merge patch on the object's
//! annotations. Authenticates with the pod's service-account token and
//! trusts the cluster CA when those files exist.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use super::{Inventory, InventoryError, InventoryItem};
use crate::config::InventoryConfig;

/// API group/version path of the Flux source controller.
pub const SOURCE_API_PATH: &str = "apis/source.toolkit.fluxcd.io/v1beta2";

/// Plural resource name of OCI repositories.
pub const RESOURCE: &str = "ocirepositories";

const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Longest error body kept in [`InventoryError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Kubernetes-backed [`Inventory`].
#[derive(Debug, Clone)]
pub struct FluxInventory {
    client: reqwest::Client,
    base_url: String,
    token_path: Option<PathBuf>,
}

impl FluxInventory {
    /// Builds the inventory client from configuration.
    ///
    /// The CA bundle is loaded if `ca_path` exists; the token file is read
    /// on every request so rotated tokens are picked up.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] if the CA bundle cannot be
    /// read or parsed, or the HTTP client cannot be built.
    pub fn from_config(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);

        let ca_path = PathBuf::from(&config.ca_path);
        if ca_path.exists() {
            let pem = std::fs::read(&ca_path).map_err(|e| {
                InventoryError::Unavailable(format!("reading {}: {e}", ca_path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| InventoryError::Unavailable(format!("parsing cluster CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| InventoryError::Unavailable(format!("building HTTP client: {e}")))?;

        let token_path = PathBuf::from(&config.token_path);
        let token_path = token_path.exists().then_some(token_path);
        if token_path.is_none() {
            tracing::warn!(
                path = %config.token_path,
                "service-account token not found, inventory requests are unauthenticated"
            );
        }

        Ok(Self::with_client(client, &config.api_url, token_path))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str, token_path: Option<PathBuf>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_path,
        }
    }

    fn list_url(&self) -> String {
        format!("{}/{SOURCE_API_PATH}/{RESOURCE}", self.base_url)
    }

    fn item_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/{SOURCE_API_PATH}/namespaces/{namespace}/{RESOURCE}/{name}",
            self.base_url
        )
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, InventoryError> {
        let Some(path) = &self.token_path else {
            return Ok(request);
        };
        let token = tokio::fs::read_to_string(path).await.map_err(|e| {
            InventoryError::Unavailable(format!("reading {}: {e}", path.display()))
        })?;
        Ok(request.header(AUTHORIZATION, format!("Bearer {}", token.trim())))
    }
}

#[async_trait]
impl Inventory for FluxInventory {
    async fn list(&self) -> Result<Vec<InventoryItem>, InventoryError> {
        let request = self.authorize(self.client.get(self.list_url())).await?;
        let response = check_status(request.send().await?).await?;
        let body = response.bytes().await?;
        items_from_list(&body)
    }

    async fn patch_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), InventoryError> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), serde_json::Value::from(value));
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        let request = self
            .client
            .patch(self.item_url(namespace, name))
            .header(CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE)
            .body(patch.to_string());
        let request = self.authorize(request).await?;
        check_status(request.send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InventoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(InventoryError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Deserialize)]
struct OciRepositoryList {
    #[serde(default)]
    items: Vec<OciRepository>,
}

#[derive(Debug, Deserialize)]
struct OciRepository {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: OciRepositorySpec,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct OciRepositorySpec {
    #[serde(default)]
    url: String,
    #[serde(default, rename = "ref")]
    reference: Option<OciRepositoryRef>,
}

#[derive(Debug, Default, Deserialize)]
struct OciRepositoryRef {
    #[serde(default)]
    tag: Option<String>,
}

/// Decodes an `OCIRepositoryList` body into inventory items.
fn items_from_list(body: &[u8]) -> Result<Vec<InventoryItem>, InventoryError> {
    let list: OciRepositoryList =
        serde_json::from_slice(body).map_err(|e| InventoryError::Decode(e.to_string()))?;
    Ok(list
        .items
        .into_iter()
        .map(|repo| InventoryItem {
            name: repo.metadata.name,
            namespace: repo.metadata.namespace,
            source_url: repo.spec.url,
            source_tag: repo
                .spec
                .reference
                .and_then(|r| r.tag)
                .unwrap_or_default(),
            annotations: repo.metadata.annotations.unwrap_or_default(),
        })
        .collect())
}
