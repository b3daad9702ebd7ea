//! Collection membership changes.
//!
//! Every change to a parent link goes through `HierarchyEditor`, which flushes
//! the cached ancestors of each affected item before it returns. Reads that
//! start after a mutation completes never see the old links.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Error;
use crate::events::{EventBus, HierarchyEvent};
use crate::model::{Collection, CollectionElement, ItemId, ItemKind};
use crate::resolver::{AncestorResolver, CollectionStore};

/// Flag changes on a collection; `None` leaves a flag as it is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionUpdate {
    pub is_hidden: Option<bool>,
    pub show_in_overview: Option<bool>,
    pub deleted: Option<bool>,
}

/// Write side of the collection store.
#[async_trait]
pub trait HierarchyStore: CollectionStore {
    async fn add_element(&self, collection_id: &str, element: CollectionElement) -> Result<()>;

    /// With `soft`, the membership moves to the deleted elements and still
    /// counts as a parent link. Otherwise it is dropped.
    async fn remove_element(&self, collection_id: &str, element_id: &str, soft: bool) -> Result<()>;

    async fn restore_element(&self, collection_id: &str, element_id: &str) -> Result<()>;

    async fn update_collection(
        &self,
        collection_id: &str,
        update: CollectionUpdate,
    ) -> Result<Collection>;
}

/// In-memory collection store, loadable from a JSON array of collections.
#[derive(Default)]
pub struct MemoryCollectionStore {
    collections: RwLock<BTreeMap<ItemId, Collection>>,
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_collections(collections: Vec<Collection>) -> Self {
        Self {
            collections: RwLock::new(
                collections
                    .into_iter()
                    .map(|collection| (collection.id.clone(), collection))
                    .collect(),
            ),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hierarchy {}", path.display()))?;
        let collections: Vec<Collection> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse hierarchy {}", path.display()))?;
        tracing::info!("Loaded {} collections from {}", collections.len(), path.display());
        Ok(Self::from_collections(collections))
    }

    pub fn get(&self, collection_id: &str) -> Option<Collection> {
        self.collections.read().get(collection_id).cloned()
    }

    pub fn collections(&self) -> Vec<Collection> {
        self.collections.read().values().cloned().collect()
    }

    fn with_collection<T>(
        &self,
        collection_id: &str,
        f: impl FnOnce(&mut Collection) -> Result<T>,
    ) -> Result<T> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(collection_id)
            .ok_or_else(|| anyhow!("Collection not found: {}", collection_id))?;
        f(collection)
    }
}

#[async_trait]
impl CollectionStore for MemoryCollectionStore {
    async fn find_collections_containing_any_of(
        &self,
        ids: &[ItemId],
        include_soft_deleted: bool,
    ) -> Result<Vec<Collection>> {
        Ok(self
            .collections
            .read()
            .values()
            .filter(|collection| {
                ids.iter()
                    .any(|id| collection.contains(id, include_soft_deleted))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HierarchyStore for MemoryCollectionStore {
    async fn add_element(&self, collection_id: &str, element: CollectionElement) -> Result<()> {
        self.with_collection(collection_id, |collection| {
            collection.deleted_elements.retain(|el| el.key != element.key);
            if !collection.elements.iter().any(|el| el.key == element.key) {
                collection.elements.push(element);
            }
            Ok(())
        })
    }

    async fn remove_element(&self, collection_id: &str, element_id: &str, soft: bool) -> Result<()> {
        self.with_collection(collection_id, |collection| {
            let position = collection
                .elements
                .iter()
                .position(|el| el.key == element_id)
                .ok_or_else(|| anyhow!("{} is not an element of {}", element_id, collection_id))?;
            let element = collection.elements.remove(position);
            if soft {
                collection.deleted_elements.push(element);
            }
            Ok(())
        })
    }

    async fn restore_element(&self, collection_id: &str, element_id: &str) -> Result<()> {
        self.with_collection(collection_id, |collection| {
            let position = collection
                .deleted_elements
                .iter()
                .position(|el| el.key == element_id)
                .ok_or_else(|| {
                    anyhow!("{} is not a deleted element of {}", element_id, collection_id)
                })?;
            let element = collection.deleted_elements.remove(position);
            collection.elements.push(element);
            Ok(())
        })
    }

    async fn update_collection(
        &self,
        collection_id: &str,
        update: CollectionUpdate,
    ) -> Result<Collection> {
        self.with_collection(collection_id, |collection| {
            if let Some(is_hidden) = update.is_hidden {
                collection.is_hidden = is_hidden;
            }
            if let Some(show_in_overview) = update.show_in_overview {
                collection.show_in_overview = show_in_overview;
            }
            match update.deleted {
                Some(true) if collection.deletion_time.is_none() => {
                    collection.deletion_time = Some(Utc::now());
                }
                Some(false) => collection.deletion_time = None,
                _ => {}
            }
            Ok(collection.clone())
        })
    }
}

/// Applies hierarchy mutations and keeps the ancestor caches in step.
pub struct HierarchyEditor {
    store: Arc<dyn HierarchyStore>,
    resolver: AncestorResolver,
    events: EventBus,
}

impl HierarchyEditor {
    pub fn new(store: Arc<dyn HierarchyStore>, resolver: AncestorResolver, events: EventBus) -> Self {
        Self {
            store,
            resolver,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn add_element(&self, collection_id: &str, element: CollectionElement) -> Result<()> {
        self.ensure_acyclic(collection_id, &element).await?;
        let element_id = element.key.clone();
        self.store.add_element(collection_id, element).await?;
        self.flush(&[element_id.clone()]).await?;
        self.events.send(HierarchyEvent::ElementAdded {
            collection_id: collection_id.to_string(),
            element_id,
        });
        Ok(())
    }

    /// Soft delete: the element keeps resolving through `collection_id`
    /// until it is restored or purged.
    pub async fn remove_element(&self, collection_id: &str, element_id: &str) -> Result<()> {
        self.store.remove_element(collection_id, element_id, true).await?;
        self.flush(&[element_id.to_string()]).await?;
        self.events.send(HierarchyEvent::ElementRemoved {
            collection_id: collection_id.to_string(),
            element_id: element_id.to_string(),
        });
        Ok(())
    }

    pub async fn restore_element(&self, collection_id: &str, element_id: &str) -> Result<()> {
        self.store.restore_element(collection_id, element_id).await?;
        self.flush(&[element_id.to_string()]).await?;
        self.events.send(HierarchyEvent::ElementRestored {
            collection_id: collection_id.to_string(),
            element_id: element_id.to_string(),
        });
        Ok(())
    }

    /// Nothing is written unless the element is an active member of `from`.
    /// Once the new link is written the element is flushed, even when
    /// dropping the old link fails.
    pub async fn move_element(
        &self,
        element: CollectionElement,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let element_id = element.key.clone();
        if from == to {
            return Err(Error::invalid_hierarchy(format!(
                "cannot move {} from {} into itself",
                element_id, from
            )));
        }
        let containing = self
            .store
            .find_collections_containing_any_of(&[element_id.clone()], false)
            .await?;
        if !containing.iter().any(|collection| collection.id == from) {
            return Err(Error::invalid_hierarchy(format!(
                "{} is not an element of {}",
                element_id, from
            )));
        }
        self.ensure_acyclic(to, &element).await?;

        self.store.add_element(to, element).await?;
        let removed = self.store.remove_element(from, &element_id, false).await;
        let flushed = self.flush(&[element_id.clone()]).await;
        removed?;
        flushed?;
        self.events.send(HierarchyEvent::ElementMoved {
            element_id,
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Flag changes live on the edges cached under each member, so every
    /// member is flushed.
    pub async fn update_collection(
        &self,
        collection_id: &str,
        update: CollectionUpdate,
    ) -> Result<Collection> {
        let collection = self.store.update_collection(collection_id, update).await?;
        self.flush(&collection.member_keys()).await?;
        self.events.send(HierarchyEvent::CollectionUpdated {
            collection_id: collection_id.to_string(),
        });
        Ok(collection)
    }

    async fn ensure_acyclic(&self, collection_id: &str, element: &CollectionElement) -> Result<()> {
        if element.kind != ItemKind::Collection {
            return Ok(());
        }
        if element.key == collection_id {
            return Err(Error::invalid_hierarchy(format!(
                "collection {} cannot contain itself",
                collection_id
            )));
        }
        let ancestors = self.resolver.get_ancestors(&[collection_id.to_string()]).await?;
        if ancestors.is_descendant_of(collection_id, &element.key) {
            return Err(Error::invalid_hierarchy(format!(
                "{} is an ancestor of {}",
                element.key, collection_id
            )));
        }
        Ok(())
    }

    async fn flush(&self, ids: &[ItemId]) -> Result<()> {
        for id in ids {
            self.resolver
                .flush_cache(id)
                .await
                .with_context(|| format!("failed to flush cached ancestors of {}", id))?;
        }
        tracing::debug!(flushed = ids.len(), "flushed cached ancestors");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancestors::AncestorItem;
    use crate::cache::{KeyValueStore, MemoryKeyValueStore, TieredAncestorCache};
    use crate::resolver::{ParentResolver, StoreParentSource};

    struct Setup {
        store: Arc<MemoryCollectionStore>,
        resolver: AncestorResolver,
        editor: HierarchyEditor,
    }

    // root -> {manuals -> {m1}, archive}
    fn setup() -> Setup {
        let store = Arc::new(MemoryCollectionStore::from_collections(vec![
            Collection::new("root")
                .with_element(CollectionElement::collection("manuals"))
                .with_element(CollectionElement::collection("archive")),
            Collection::new("manuals").with_element(CollectionElement::document("m1")),
            Collection::new("archive"),
        ]));
        let source = Arc::new(StoreParentSource::new(store.clone()));
        let cache = Arc::new(TieredAncestorCache::new(source, Arc::new(MemoryKeyValueStore::new())));
        let resolver = AncestorResolver::new(cache);
        let editor = HierarchyEditor::new(store.clone(), resolver.clone(), EventBus::new());
        Setup {
            store,
            resolver,
            editor,
        }
    }

    fn ids(values: &[&str]) -> Vec<ItemId> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn move_is_visible_to_the_next_read() {
        let s = setup();
        let before = s.resolver.get_ancestors(&ids(&["m1"])).await.unwrap();
        assert!(before.is_descendant_of("m1", "manuals"));

        let mut events = s.editor.events().subscribe();
        s.editor
            .move_element(CollectionElement::document("m1"), "manuals", "archive")
            .await
            .unwrap();

        let after = s.resolver.get_ancestors(&ids(&["m1"])).await.unwrap();
        assert_eq!(after.get("m1").unwrap(), &[AncestorItem::new("archive")]);
        assert_eq!(
            events.recv().await.unwrap(),
            HierarchyEvent::ElementMoved {
                element_id: "m1".to_string(),
                from: "manuals".to_string(),
                to: "archive".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn soft_removed_parent_still_resolves() {
        let s = setup();
        s.resolver.get_ancestors(&ids(&["m1"])).await.unwrap();
        s.editor.remove_element("manuals", "m1").await.unwrap();

        let ancestors = s.resolver.get_ancestors(&ids(&["m1"])).await.unwrap();
        assert!(ancestors.is_descendant_of("m1", "manuals"));
        assert!(!s.store.get("manuals").unwrap().contains("m1", false));

        s.editor.restore_element("manuals", "m1").await.unwrap();
        assert!(s.store.get("manuals").unwrap().contains("m1", false));
    }

    #[tokio::test]
    async fn flag_updates_reach_cached_children() {
        let s = setup();
        assert!(!s.resolver.is_hidden_in_ancestors("m1").await.unwrap());

        let updated = s
            .editor
            .update_collection(
                "manuals",
                CollectionUpdate {
                    is_hidden: Some(true),
                    deleted: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.is_deleted());

        assert!(s.resolver.is_hidden_in_ancestors("m1").await.unwrap());
        let ancestors = s.resolver.get_ancestors(&ids(&["m1"])).await.unwrap();
        assert!(ancestors.get("m1").unwrap()[0].is_deleted);
    }

    #[tokio::test]
    async fn rejects_cycles() {
        let s = setup();
        let err = s
            .editor
            .add_element("manuals", CollectionElement::collection("root"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidHierarchy { .. })
        ));

        let err = s
            .editor
            .add_element("archive", CollectionElement::collection("archive"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidHierarchy { .. })
        ));

        // documents are never checked
        s.editor
            .add_element("archive", CollectionElement::document("m1"))
            .await
            .unwrap();
        let ancestors = s.resolver.get_ancestors(&ids(&["m1"])).await.unwrap();
        assert_eq!(ancestors.get("m1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_collection_is_an_error() {
        let s = setup();
        assert!(s
            .editor
            .add_element("missing", CollectionElement::document("m1"))
            .await
            .is_err());
        assert!(s.editor.remove_element("archive", "m1").await.is_err());
    }

    /// Parent lists straight from the store, bypassing every cache tier.
    async fn stored_parents(store: &Arc<MemoryCollectionStore>, id: &str) -> Vec<AncestorItem> {
        let source = StoreParentSource::new(store.clone());
        let parents = source.get_parents(&ids(&[id])).await.unwrap();
        parents.get(id).map(|items| items.to_vec()).unwrap_or_default()
    }

    async fn cached_parents(resolver: &AncestorResolver, id: &str) -> Vec<AncestorItem> {
        let ancestors = resolver.get_ancestors(&ids(&[id])).await.unwrap();
        ancestors.get(id).map(|items| items.to_vec()).unwrap_or_default()
    }

    #[tokio::test]
    async fn move_from_a_non_member_collection_writes_nothing() {
        let s = setup();
        assert_eq!(cached_parents(&s.resolver, "m1").await, vec![AncestorItem::new("manuals")]);

        let err = s
            .editor
            .move_element(CollectionElement::document("m1"), "archive", "root")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidHierarchy { .. })
        ));

        assert!(!s.store.get("root").unwrap().contains("m1", true));
        assert_eq!(
            cached_parents(&s.resolver, "m1").await,
            stored_parents(&s.store, "m1").await
        );
    }

    #[tokio::test]
    async fn move_into_the_same_collection_is_rejected() {
        let s = setup();
        let mut events = s.editor.events().subscribe();

        let err = s
            .editor
            .move_element(CollectionElement::document("m1"), "manuals", "manuals")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidHierarchy { .. })
        ));

        assert!(s.store.get("manuals").unwrap().contains("m1", false));
        assert_eq!(cached_parents(&s.resolver, "m1").await, vec![AncestorItem::new("manuals")]);
        assert!(events.try_recv().is_err());
    }

    struct RejectingRemoveStore {
        inner: Arc<MemoryCollectionStore>,
    }

    #[async_trait]
    impl CollectionStore for RejectingRemoveStore {
        async fn find_collections_containing_any_of(
            &self,
            ids: &[ItemId],
            include_soft_deleted: bool,
        ) -> Result<Vec<Collection>> {
            self.inner
                .find_collections_containing_any_of(ids, include_soft_deleted)
                .await
        }
    }

    #[async_trait]
    impl HierarchyStore for RejectingRemoveStore {
        async fn add_element(&self, collection_id: &str, element: CollectionElement) -> Result<()> {
            self.inner.add_element(collection_id, element).await
        }

        async fn remove_element(&self, _collection_id: &str, _element_id: &str, _soft: bool) -> Result<()> {
            Err(anyhow!("write rejected"))
        }

        async fn restore_element(&self, collection_id: &str, element_id: &str) -> Result<()> {
            self.inner.restore_element(collection_id, element_id).await
        }

        async fn update_collection(
            &self,
            collection_id: &str,
            update: CollectionUpdate,
        ) -> Result<Collection> {
            self.inner.update_collection(collection_id, update).await
        }
    }

    #[tokio::test]
    async fn half_applied_move_is_still_flushed() {
        let s = setup();
        let editor = HierarchyEditor::new(
            Arc::new(RejectingRemoveStore {
                inner: s.store.clone(),
            }),
            s.resolver.clone(),
            EventBus::new(),
        );
        cached_parents(&s.resolver, "m1").await;

        let err = editor
            .move_element(CollectionElement::document("m1"), "manuals", "archive")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("write rejected"));

        let stored = stored_parents(&s.store, "m1").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(cached_parents(&s.resolver, "m1").await, stored);
    }

    struct FailingDeleteStore {
        inner: MemoryKeyValueStore,
    }

    #[async_trait]
    impl KeyValueStore for FailingDeleteStore {
        async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
            self.inner.mget(keys).await
        }

        async fn mset(&self, entries: &[(String, String)]) -> Result<()> {
            self.inner.mset(entries).await
        }

        async fn del(&self, _key: &str) -> Result<()> {
            Err(anyhow!("delete refused"))
        }
    }

    #[tokio::test]
    async fn failed_flush_surfaces_without_publishing() {
        let s = setup();
        let source = Arc::new(StoreParentSource::new(s.store.clone()));
        let cache = Arc::new(TieredAncestorCache::new(
            source,
            Arc::new(FailingDeleteStore {
                inner: MemoryKeyValueStore::new(),
            }),
        ));
        let resolver = AncestorResolver::new(cache);
        let editor = HierarchyEditor::new(s.store.clone(), resolver.clone(), EventBus::new());
        let mut events = editor.events().subscribe();
        cached_parents(&resolver, "m1").await;

        let err = editor
            .add_element("archive", CollectionElement::document("m1"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("failed to flush cached ancestors of m1"));
        assert!(format!("{:#}", err).contains("delete refused"));

        // the write stays, the caller learns the caches may be stale
        assert!(s.store.get("archive").unwrap().contains("m1", false));
        assert_eq!(cached_parents(&resolver, "m1").await, vec![AncestorItem::new("manuals")]);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn loads_store_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(
            &path,
            r#"[{"id": "root", "elements": [{"key": "doc", "kind": "document"}], "showInOverview": false}]"#,
        )
        .unwrap();

        let store = MemoryCollectionStore::load(&path).unwrap();
        let root = store.get("root").unwrap();
        assert!(root.contains("doc", false));
        assert!(!root.show_in_overview);
        assert!(!root.is_hidden);
        assert_eq!(store.collections().len(), 1);
    }
}
