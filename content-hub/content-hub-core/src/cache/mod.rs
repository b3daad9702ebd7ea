//! Caching decorators for `ParentResolver`.
//!
//! - `TieredAncestorCache`: process-local map in front of a persistent
//!   key/value store (redis in production).
//! - `RequestScopedAncestorCache`: local memo that lives as long as one
//!   logical operation, e.g. rendering a page of search results.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ancestors::{AncestorItem, Ancestors};
use crate::error::Error;
use crate::model::ItemId;
use crate::resolver::ParentResolver;

pub mod redis_store;

pub use redis_store::RedisKeyValueStore;

/// Bump whenever the serialized `AncestorItem` layout changes.
pub const ANCESTOR_CACHE_VERSION: u32 = 3;
pub const DEFAULT_KEY_PREFIX: &str = "doc-anc-";

/// Persistent cache transport.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// One value slot per key, `None` for missing keys.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
    async fn mset(&self, entries: &[(String, String)]) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let data = self.data.read();
        Ok(keys.iter().map(|key| data.get(key).cloned()).collect())
    }

    async fn mset(&self, entries: &[(String, String)]) -> Result<()> {
        let mut data = self.data.write();
        for (key, value) in entries {
            data.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}

/// Two-tier cache of direct-parent lists.
pub struct TieredAncestorCache {
    inner: Arc<dyn ParentResolver>,
    store: Arc<dyn KeyValueStore>,
    local: RwLock<HashMap<String, String>>,
    key_prefix: String,
}

impl TieredAncestorCache {
    pub fn new(inner: Arc<dyn ParentResolver>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner,
            store,
            local: RwLock::new(HashMap::new()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn cache_key(&self, id: &str) -> String {
        format!("{}{}-{}", self.key_prefix, ANCESTOR_CACHE_VERSION, id)
    }

    /// Drop every locally cached entry. The persistent tier is untouched.
    pub fn clear(&self) {
        self.local.write().clear();
    }

    pub fn local_len(&self) -> usize {
        self.local.read().len()
    }

    fn decode(key: &str, raw: &str) -> Option<Vec<AncestorItem>> {
        match serde_json::from_str(raw) {
            Ok(items) => Some(items),
            Err(e) => {
                let err = Error::CacheDeserialization {
                    key: key.to_string(),
                    message: e.to_string(),
                };
                warn!("{}", err);
                None
            }
        }
    }

    /// Probe the persistent tier for `ids`, promoting hits into the local
    /// tier. Returns the ids that are still missing.
    async fn read_persistent(
        &self,
        ids: Vec<ItemId>,
        found: &mut HashMap<ItemId, Vec<AncestorItem>>,
    ) -> Vec<ItemId> {
        if ids.is_empty() {
            return ids;
        }
        let keys: Vec<String> = ids.iter().map(|id| self.cache_key(id)).collect();
        let values = match self.store.mget(&keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "persistent ancestor cache read failed");
                return ids;
            }
        };

        let mut missing = Vec::new();
        let mut local = self.local.write();
        for (index, id) in ids.into_iter().enumerate() {
            let key = &keys[index];
            let raw = values.get(index).cloned().flatten();
            match raw.as_deref().and_then(|raw| Self::decode(key, raw)) {
                Some(items) => {
                    if let Some(raw) = raw {
                        local.insert(key.clone(), raw);
                    }
                    found.insert(id, items);
                }
                None => missing.push(id),
            }
        }
        missing
    }

    async fn write_through(&self, fetched: &Ancestors) -> Result<()> {
        let mut entries = Vec::with_capacity(fetched.len());
        for (id, parents) in fetched.iter() {
            entries.push((self.cache_key(id), serde_json::to_string(parents)?));
        }
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut local = self.local.write();
            for (key, value) in &entries {
                local.insert(key.clone(), value.clone());
            }
        }
        if let Err(e) = self.store.mset(&entries).await {
            warn!(error = %e, entries = entries.len(), "persistent ancestor cache write failed");
        }
        Ok(())
    }
}

#[async_trait]
impl ParentResolver for TieredAncestorCache {
    async fn get_parents(&self, ids: &[ItemId]) -> Result<Ancestors> {
        let ids = dedupe(ids);
        let mut found: HashMap<ItemId, Vec<AncestorItem>> = HashMap::new();

        let mut local_misses = Vec::new();
        {
            let local = self.local.read();
            for id in ids {
                let key = self.cache_key(&id);
                match local.get(&key).and_then(|raw| Self::decode(&key, raw)) {
                    Some(items) => {
                        found.insert(id, items);
                    }
                    None => local_misses.push(id),
                }
            }
        }

        let misses = self.read_persistent(local_misses, &mut found).await;
        debug!(
            cached = found.len(),
            missing = misses.len(),
            "ancestor cache lookup"
        );

        let cached = Ancestors::from_items(found);
        if misses.is_empty() {
            return Ok(cached);
        }

        // ids the source has no parents for are roots, cached as empty lists
        let mut fetched = self.inner.get_parents(&misses).await?;
        for id in &misses {
            if !fetched.has(id) {
                fetched = fetched.add_element(id.clone(), Vec::new());
            }
        }
        self.write_through(&fetched).await?;
        Ok(cached.merge(&fetched))
    }

    async fn flush_cache(&self, id: &str) -> Result<()> {
        let key = self.cache_key(id);
        self.store.del(&key).await?;
        self.local.write().remove(&key);
        self.inner.flush_cache(id).await
    }
}

/// Local memo for the duration of one logical operation.
pub struct RequestScopedAncestorCache {
    inner: Arc<dyn ParentResolver>,
    memo: RwLock<HashMap<ItemId, Vec<AncestorItem>>>,
}

impl RequestScopedAncestorCache {
    pub fn new(inner: Arc<dyn ParentResolver>) -> Self {
        Self {
            inner,
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.memo.write().clear();
    }

    pub fn len(&self) -> usize {
        self.memo.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.read().is_empty()
    }
}

#[async_trait]
impl ParentResolver for RequestScopedAncestorCache {
    async fn get_parents(&self, ids: &[ItemId]) -> Result<Ancestors> {
        let mut items = HashMap::new();
        let mut to_fetch = Vec::new();
        {
            let memo = self.memo.read();
            for id in dedupe(ids) {
                match memo.get(&id) {
                    Some(parents) => {
                        items.insert(id, parents.clone());
                    }
                    None => to_fetch.push(id),
                }
            }
        }

        if !to_fetch.is_empty() {
            let extra = self.inner.get_parents(&to_fetch).await?;
            let mut memo = self.memo.write();
            for (id, parents) in extra.iter() {
                memo.insert(id.clone(), parents.clone());
                items.insert(id.clone(), parents.clone());
            }
        }
        Ok(Ancestors::from_items(items))
    }

    async fn flush_cache(&self, id: &str) -> Result<()> {
        self.memo.write().remove(id);
        self.inner.flush_cache(id).await
    }
}

fn dedupe(ids: &[ItemId]) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests;
