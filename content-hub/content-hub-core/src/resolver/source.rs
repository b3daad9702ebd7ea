//! Live parent source backed by the collection store.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::ParentResolver;
use crate::ancestors::{AncestorItem, Ancestors};
use crate::error::Error;
use crate::model::{Collection, ItemId};

/// Read side of the document/collection store.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Every collection whose membership includes at least one of `ids`.
    /// With `include_soft_deleted`, soft-deleted memberships count too.
    async fn find_collections_containing_any_of(
        &self,
        ids: &[ItemId],
        include_soft_deleted: bool,
    ) -> Result<Vec<Collection>>;
}

pub struct StoreParentSource {
    store: Arc<dyn CollectionStore>,
}

impl StoreParentSource {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ParentResolver for StoreParentSource {
    async fn get_parents(&self, ids: &[ItemId]) -> Result<Ancestors> {
        if ids.is_empty() {
            return Ok(Ancestors::new());
        }

        let collections = self
            .store
            .find_collections_containing_any_of(ids, true)
            .await
            .map_err(|e| Error::SourceFetch {
                message: format!("{e:#}"),
            })?;

        let mut items: HashMap<ItemId, Vec<AncestorItem>> = HashMap::new();
        for id in ids {
            if items.contains_key(id) {
                continue;
            }
            let parents: Vec<AncestorItem> = collections
                .iter()
                .filter(|collection| collection.contains(id, true))
                .map(AncestorItem::from)
                .collect();
            if !parents.is_empty() {
                items.insert(id.clone(), parents);
            }
        }

        tracing::debug!(
            requested = ids.len(),
            collections = collections.len(),
            "fetched parents from store"
        );
        Ok(Ancestors::from_items(items))
    }
}
