//! In-memory inventory for tests and local dry runs.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Inventory, InventoryError, InventoryItem};

/// A patch call observed by [`InMemoryInventory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCall {
    /// Target namespace.
    pub namespace: String,
    /// Target name.
    pub name: String,
    /// Annotation key.
    pub key: String,
    /// Annotation value.
    pub value: String,
}

#[derive(Debug, Default)]
struct State {
    items: Vec<InventoryItem>,
    patches: Vec<PatchCall>,
    list_calls: usize,
    fail_list: bool,
    fail_patch: HashSet<String>,
}

/// Inventory held in process memory.
///
/// Successful patches are applied to the stored annotations so repeated
/// matches observe the latest value. Failures can be injected per call
/// type for testing failure isolation.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: Mutex<State>,
}

impl InMemoryInventory {
    /// Creates an inventory with the given items.
    #[must_use]
    pub fn new(items: Vec<InventoryItem>) -> Self {
        Self {
            state: Mutex::new(State {
                items,
                ..State::default()
            }),
        }
    }

    /// Makes every subsequent `list` call fail (or succeed again).
    pub fn set_fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    /// Makes patches of the item named `name` fail.
    pub fn fail_patch_for(&self, name: &str) {
        self.state.lock().fail_patch.insert(name.to_string());
    }

    /// Adds an item.
    pub fn insert(&self, item: InventoryItem) {
        self.state.lock().items.push(item);
    }

    /// Returns a copy of the stored items.
    #[must_use]
    pub fn items(&self) -> Vec<InventoryItem> {
        self.state.lock().items.clone()
    }

    /// Returns every patch attempt, including failed ones, in call order.
    #[must_use]
    pub fn patches(&self) -> Vec<PatchCall> {
        self.state.lock().patches.clone()
    }

    /// Number of `list` calls so far.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }
}

#[async_trait]
impl Inventory for InMemoryInventory {
    async fn list(&self) -> Result<Vec<InventoryItem>, InventoryError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.fail_list {
            return Err(InventoryError::Unavailable("list disabled".to_string()));
        }
        Ok(state.items.clone())
    }

    async fn patch_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), InventoryError> {
        let mut state = self.state.lock();
        state.patches.push(PatchCall {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        if state.fail_patch.contains(name) {
            return Err(InventoryError::Status {
                status: 500,
                body: format!("patch of {namespace}/{name} rejected"),
            });
        }
        let item = state
            .items
            .iter_mut()
            .find(|item| item.namespace == namespace && item.name == name)
            .ok_or_else(|| InventoryError::Status {
                status: 404,
                body: format!("{namespace}/{name} not found"),
            })?;
        item.annotations.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
