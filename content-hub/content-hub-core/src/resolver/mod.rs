//! Ancestor-closure resolution.
//!
//! `AncestorResolver` walks the hierarchy one level at a time, asking a chain
//! of `ParentResolver`s (caches wrapping a live source) for the direct parents
//! of the current frontier until nothing new is discovered.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::ancestors::{Ancestors, DocumentAncestors};
use crate::model::ItemId;

pub mod source;

pub use source::{CollectionStore, StoreParentSource};

/// Anything that can answer "what are the direct parents of these ids".
#[async_trait]
pub trait ParentResolver: Send + Sync {
    /// Direct parents of `ids`, in one batch. Ids without any parent may be
    /// left out of the answer.
    async fn get_parents(&self, ids: &[ItemId]) -> Result<Ancestors>;

    /// Forget whatever is cached about `id`.
    async fn flush_cache(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// Resolves full ancestor closures over a `ParentResolver` chain.
#[derive(Clone)]
pub struct AncestorResolver {
    chain: Arc<dyn ParentResolver>,
}

impl AncestorResolver {
    pub fn new(chain: Arc<dyn ParentResolver>) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> Arc<dyn ParentResolver> {
        self.chain.clone()
    }

    /// Every id reachable from `ids` through parent edges, each with its
    /// direct parents. Roots get an explicit empty entry.
    pub async fn get_ancestors(&self, ids: &[ItemId]) -> Result<Ancestors> {
        self.get_ancestors_from(ids, Ancestors::new()).await
    }

    /// Same as `get_ancestors`, continuing from an already resolved graph.
    /// Ids present in `found` are not fetched again.
    pub async fn get_ancestors_from(&self, ids: &[ItemId], found: Ancestors) -> Result<Ancestors> {
        let mut resolved = found;
        let mut seen = HashSet::new();
        let mut frontier: Vec<ItemId> = ids
            .iter()
            .filter(|id| !resolved.has(id) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut level = 0usize;
        while !frontier.is_empty() {
            let parents = self.chain.get_parents(&frontier).await?;
            level += 1;
            debug!(
                level,
                requested = frontier.len(),
                with_parents = parents.len(),
                "resolved ancestor frontier"
            );

            for id in &frontier {
                if !parents.has(id) && !resolved.has(id) {
                    resolved = resolved.add_element(id.clone(), Vec::new());
                }
            }
            if parents.is_empty() {
                break;
            }

            resolved = resolved.merge(&parents);
            frontier = resolved.difference(&parents);
        }
        Ok(resolved)
    }

    pub async fn document_ancestors(
        &self,
        ids: &[ItemId],
        exclude_hidden: bool,
    ) -> Result<DocumentAncestors> {
        let ancestors = self.get_ancestors(ids).await?;
        Ok(ancestors.to_document_ancestors(exclude_hidden))
    }

    /// True when every path from `id` to a root crosses a hidden collection.
    pub async fn is_hidden_in_ancestors(&self, id: &str) -> Result<bool> {
        let ancestors = self.get_ancestors(&[id.to_string()]).await?;
        Ok(!ancestors.has_visible_parent_path(id))
    }

    /// Keep the ids that are `scope_id` itself or live somewhere below it.
    /// Input order is preserved.
    pub async fn filter_items_by_scope(
        &self,
        ids: &[ItemId],
        scope_id: &str,
    ) -> Result<Vec<ItemId>> {
        let ancestors = self.get_ancestors(ids).await?;
        Ok(ids
            .iter()
            .filter(|id| id.as_str() == scope_id || ancestors.is_descendant_of(id, scope_id))
            .cloned()
            .collect())
    }

    pub async fn flush_cache(&self, id: &str) -> Result<()> {
        self.chain.flush_cache(id).await
    }
}
