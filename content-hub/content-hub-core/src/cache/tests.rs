#[cfg(test)]
mod tests {
    use crate::ancestors::{AncestorItem, Ancestors};
    use crate::cache::*;
    use crate::model::ItemId;
    use crate::resolver::{AncestorResolver, ParentResolver};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    // Mock implementations for testing

    struct CountingSource {
        tree: Mutex<HashMap<ItemId, Vec<AncestorItem>>>,
        requests: Mutex<Vec<Vec<ItemId>>>,
        flushed: Mutex<Vec<ItemId>>,
    }

    impl CountingSource {
        fn new(edges: Vec<(&str, Vec<AncestorItem>)>) -> Arc<Self> {
            Arc::new(Self {
                tree: Mutex::new(
                    edges
                        .into_iter()
                        .map(|(id, parents)| (id.to_string(), parents))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
                flushed: Mutex::new(Vec::new()),
            })
        }

        fn set_parents(&self, id: &str, parents: Vec<AncestorItem>) {
            self.tree.lock().insert(id.to_string(), parents);
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl ParentResolver for CountingSource {
        async fn get_parents(&self, ids: &[ItemId]) -> Result<Ancestors> {
            self.requests.lock().push(ids.to_vec());
            let tree = self.tree.lock();
            Ok(ids
                .iter()
                .filter_map(|id| tree.get(id).map(|p| (id.clone(), p.clone())))
                .collect())
        }

        async fn flush_cache(&self, id: &str) -> Result<()> {
            self.flushed.lock().push(id.to_string());
            Ok(())
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl KeyValueStore for UnavailableStore {
        async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>> {
            Err(anyhow!("redis down"))
        }

        async fn mset(&self, _entries: &[(String, String)]) -> Result<()> {
            Err(anyhow!("redis down"))
        }

        async fn del(&self, _key: &str) -> Result<()> {
            Err(anyhow!("redis down"))
        }
    }

    fn ids(values: &[&str]) -> Vec<ItemId> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn sample_source() -> Arc<CountingSource> {
        CountingSource::new(vec![
            ("doc1", vec![AncestorItem::new("col1")]),
            ("col1", vec![AncestorItem::new("root").not_advertised()]),
        ])
    }

    #[tokio::test]
    async fn warm_cache_matches_cold_cache_without_refetch() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        let cache = Arc::new(TieredAncestorCache::new(source.clone(), store.clone()));
        let resolver = AncestorResolver::new(cache.clone());

        let cold = resolver.get_ancestors(&ids(&["doc1"])).await.unwrap();
        let fetches_after_cold = source.request_count();
        let warm = resolver.get_ancestors(&ids(&["doc1"])).await.unwrap();

        assert_eq!(cold, warm);
        assert_eq!(source.request_count(), fetches_after_cold);
    }

    #[tokio::test]
    async fn roots_are_cached_as_empty_lists() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        let cache = TieredAncestorCache::new(source.clone(), store.clone());

        let parents = cache.get_parents(&ids(&["root"])).await.unwrap();
        assert!(parents.get("root").unwrap().is_empty());
        assert_eq!(store.get("doc-anc-3-root").unwrap(), "[]");

        cache.get_parents(&ids(&["root"])).await.unwrap();
        assert_eq!(source.request_count(), 1);

        // a root that later gains a parent is picked up after a flush
        source.set_parents("root", vec![AncestorItem::new("top")]);
        cache.flush_cache("root").await.unwrap();
        let parents = cache.get_parents(&ids(&["root"])).await.unwrap();
        assert_eq!(parents.get("root").unwrap(), &[AncestorItem::new("top")]);
    }

    #[tokio::test]
    async fn writes_versioned_keys_to_both_tiers() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        let cache = TieredAncestorCache::new(source, store.clone());

        cache.get_parents(&ids(&["doc1"])).await.unwrap();

        let raw = store.get("doc-anc-3-doc1").unwrap();
        let items: Vec<AncestorItem> = serde_json::from_str(&raw).unwrap();
        assert_eq!(items, vec![AncestorItem::new("col1")]);
        assert_eq!(cache.local_len(), 1);
    }

    #[tokio::test]
    async fn custom_prefix_is_used_for_keys() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let cache = TieredAncestorCache::new(sample_source(), store.clone())
            .with_key_prefix("tenant-a-anc-");
        assert_eq!(cache.cache_key("doc1"), "tenant-a-anc-3-doc1");

        cache.get_parents(&ids(&["doc1"])).await.unwrap();
        assert!(store.get("tenant-a-anc-3-doc1").is_some());
    }

    #[tokio::test]
    async fn persistent_hits_are_promoted_to_local_tier() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let first = TieredAncestorCache::new(sample_source(), store.clone());
        first.get_parents(&ids(&["doc1", "col1"])).await.unwrap();

        // a second process sharing the same persistent tier
        let source = sample_source();
        let second = TieredAncestorCache::new(source.clone(), store.clone());
        let parents = second.get_parents(&ids(&["doc1", "col1"])).await.unwrap();

        assert_eq!(source.request_count(), 0);
        assert_eq!(parents.len(), 2);
        assert_eq!(second.local_len(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_are_fetched_once() {
        let source = sample_source();
        let cache = TieredAncestorCache::new(source.clone(), Arc::new(MemoryKeyValueStore::new()));
        cache.get_parents(&ids(&["doc1", "doc1", "doc1"])).await.unwrap();
        assert_eq!(*source.requests.lock(), vec![ids(&["doc1"])]);
    }

    #[tokio::test]
    async fn flush_forces_refetch_from_source() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        let cache = Arc::new(TieredAncestorCache::new(source.clone(), store.clone()));
        let resolver = AncestorResolver::new(cache.clone());

        resolver.get_ancestors(&ids(&["doc1"])).await.unwrap();
        source.set_parents("doc1", vec![AncestorItem::new("col2")]);

        // stale until flushed
        let stale = cache.get_parents(&ids(&["doc1"])).await.unwrap();
        assert_eq!(stale.get("doc1").unwrap()[0].id, "col1");

        resolver.flush_cache("doc1").await.unwrap();
        assert!(store.get("doc-anc-3-doc1").is_none());
        assert_eq!(*source.flushed.lock(), ids(&["doc1"]));

        let fresh = resolver.get_ancestors(&ids(&["doc1"])).await.unwrap();
        assert_eq!(fresh.get("doc1").unwrap()[0].id, "col2");
        assert!(fresh.has("col2"));
    }

    #[tokio::test]
    async fn corrupt_persistent_value_is_a_miss() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        store.insert("doc-anc-3-doc1", "{not json");
        let cache = TieredAncestorCache::new(source.clone(), store.clone());

        let parents = cache.get_parents(&ids(&["doc1"])).await.unwrap();

        assert_eq!(parents.get("doc1").unwrap(), &[AncestorItem::new("col1")]);
        assert_eq!(source.request_count(), 1);
        // overwritten with a valid value
        let raw = store.get("doc-anc-3-doc1").unwrap();
        assert!(serde_json::from_str::<Vec<AncestorItem>>(&raw).is_ok());
    }

    #[tokio::test]
    async fn unavailable_persistent_tier_never_fails_reads() {
        let source = sample_source();
        let cache = TieredAncestorCache::new(source.clone(), Arc::new(UnavailableStore));

        let parents = cache.get_parents(&ids(&["doc1"])).await.unwrap();
        assert_eq!(parents.get("doc1").unwrap()[0].id, "col1");

        // the local tier still absorbs repeated reads
        cache.get_parents(&ids(&["doc1"])).await.unwrap();
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn flush_failure_propagates() {
        let cache = TieredAncestorCache::new(sample_source(), Arc::new(UnavailableStore));
        assert!(cache.flush_cache("doc1").await.is_err());
    }

    #[tokio::test]
    async fn clear_only_empties_local_tier() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        let cache = TieredAncestorCache::new(source.clone(), store.clone());
        cache.get_parents(&ids(&["doc1"])).await.unwrap();

        cache.clear();
        assert_eq!(cache.local_len(), 0);
        assert_eq!(store.len(), 1);

        cache.get_parents(&ids(&["doc1"])).await.unwrap();
        assert_eq!(source.request_count(), 1);
        assert_eq!(cache.local_len(), 1);
    }

    #[tokio::test]
    async fn request_scoped_cache_memoizes() {
        let source = sample_source();
        let scoped = RequestScopedAncestorCache::new(source.clone());

        let first = scoped.get_parents(&ids(&["doc1", "col1"])).await.unwrap();
        let second = scoped.get_parents(&ids(&["col1", "doc1"])).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.request_count(), 1);
        assert_eq!(scoped.len(), 2);
    }

    #[tokio::test]
    async fn request_scoped_cache_flush_evicts_and_forwards() {
        let source = sample_source();
        let scoped = RequestScopedAncestorCache::new(source.clone());
        scoped.get_parents(&ids(&["doc1"])).await.unwrap();

        scoped.flush_cache("doc1").await.unwrap();
        assert!(scoped.is_empty());
        assert_eq!(*source.flushed.lock(), ids(&["doc1"]));

        scoped.get_parents(&ids(&["doc1"])).await.unwrap();
        assert_eq!(source.request_count(), 2);
    }

    #[tokio::test]
    async fn full_chain_resolves_like_the_bare_source() {
        let source = sample_source();
        let store = Arc::new(MemoryKeyValueStore::new());
        let tiered: Arc<dyn ParentResolver> =
            Arc::new(TieredAncestorCache::new(source.clone(), store));
        let scoped = Arc::new(RequestScopedAncestorCache::new(tiered));

        let cached = AncestorResolver::new(scoped)
            .get_ancestors(&ids(&["doc1"]))
            .await
            .unwrap();
        let bare = AncestorResolver::new(source)
            .get_ancestors(&ids(&["doc1"]))
            .await
            .unwrap();
        assert_eq!(cached, bare);
        assert_eq!(cached.len(), 3);
    }
}
