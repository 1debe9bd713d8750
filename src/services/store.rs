// Persistence boundary
//
// The pipeline reads item snapshots and writes per-phase updates through
// ItemStore; it never creates or deletes items.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{Item, ItemId, ItemUpdate};

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, item_id: &str) -> StoreResult<Item>;
    async fn persist(&self, item_id: &str, update: &ItemUpdate) -> StoreResult<()>;
}

/// DashMap-backed store used by the server binary and tests
#[derive(Clone, Default)]
pub struct InMemoryItemStore {
    items: Arc<DashMap<ItemId, Item>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let store = Self::new();
        for item in items {
            store.upsert(item);
        }
        store
    }

    /// Seed from a JSON array of item snapshots
    pub fn load_from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| StoreError::LoadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let items: Vec<Item> = serde_json::from_str(&raw)?;
        info!("✓ Loaded {} items from {}", items.len(), path.display());
        Ok(Self::with_items(items))
    }

    /// Insert or replace a snapshot (catalog import, not a pipeline write)
    pub fn upsert(&self, item: Item) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<_> = self.items.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, item_id: &str) -> StoreResult<Item> {
        self.items
            .get(item_id)
            .map(|item| item.value().clone())
            .ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))
    }

    async fn persist(&self, item_id: &str, update: &ItemUpdate) -> StoreResult<()> {
        let mut item = self
            .items
            .get_mut(item_id)
            .ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
        update.apply(item.value_mut());
        debug!("Persisted update for item {}", item_id);
        Ok(())
    }
}
