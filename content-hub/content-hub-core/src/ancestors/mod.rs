//! Partial parent-link graph of the collection hierarchy.
//!
//! `Ancestors` maps every resolved item id to its *direct* parents. An empty
//! parent list means the item was resolved and is a root. Items may have more
//! than one parent, so walks over the graph always track what they visited.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use crate::model::{Collection, ItemId};

/// Flattened view: item id to the ids of its parents.
pub type DocumentAncestors = BTreeMap<ItemId, Vec<ItemId>>;

/// One parent edge, annotated with the parent's visibility flags.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AncestorItem {
    pub id: ItemId,
    pub is_hidden: bool,
    pub is_deleted: bool,
    pub show_in_overview: bool,
}

impl AncestorItem {
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            is_hidden: false,
            is_deleted: false,
            show_in_overview: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    pub fn not_advertised(mut self) -> Self {
        self.show_in_overview = false;
        self
    }
}

impl From<&Collection> for AncestorItem {
    fn from(collection: &Collection) -> Self {
        Self {
            id: collection.id.clone(),
            is_hidden: collection.is_hidden,
            is_deleted: collection.is_deleted(),
            show_in_overview: collection.show_in_overview,
        }
    }
}

/// Copy-on-write parent graph. Cloning is cheap; `add_element` and `merge`
/// never change a graph another holder still references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ancestors {
    items: Arc<HashMap<ItemId, Vec<AncestorItem>>>,
}

impl Ancestors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: HashMap<ItemId, Vec<AncestorItem>>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    /// Return a graph where `id` has exactly `parents` as direct parents.
    pub fn add_element(mut self, id: impl Into<ItemId>, parents: Vec<AncestorItem>) -> Self {
        Arc::make_mut(&mut self.items).insert(id.into(), parents);
        self
    }

    pub fn has(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[AncestorItem]> {
        self.items.get(id).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ItemId> {
        self.items.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &Vec<AncestorItem>)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &HashMap<ItemId, Vec<AncestorItem>> {
        &self.items
    }

    /// Parent ids referenced by `other` that are not resolved in `self`,
    /// deduplicated. This is the next frontier of a breadth-first resolution.
    pub fn difference(&self, other: &Ancestors) -> Vec<ItemId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in sorted_keys(other) {
            for parent in &other.items[id] {
                if !self.has(&parent.id) && seen.insert(parent.id.as_str()) {
                    out.push(parent.id.clone());
                }
            }
        }
        out
    }

    /// Union of both graphs; entries already present in `self` win.
    pub fn merge(&self, other: &Ancestors) -> Ancestors {
        let mut merged = self.clone();
        if other.is_empty() {
            return merged;
        }
        let items = Arc::make_mut(&mut merged.items);
        for (id, parents) in other.items.iter() {
            items
                .entry(id.clone())
                .or_insert_with(|| parents.clone());
        }
        merged
    }

    /// Flatten to `id -> [parent ids]`.
    ///
    /// With `exclude_hidden`, hidden collections disappear from the result:
    /// they are dropped as keys and, wherever one appears as a parent, its own
    /// parents take its place. Connectivity is kept, only the hidden hop is
    /// skipped.
    pub fn to_document_ancestors(&self, exclude_hidden: bool) -> DocumentAncestors {
        if !exclude_hidden {
            return self
                .items
                .iter()
                .map(|(id, parents)| {
                    (id.clone(), parents.iter().map(|p| p.id.clone()).collect())
                })
                .collect();
        }

        let hidden: HashSet<&str> = self
            .items
            .values()
            .flatten()
            .filter(|p| p.is_hidden)
            .map(|p| p.id.as_str())
            .collect();

        let mut out = DocumentAncestors::new();
        for (id, parents) in self.items.iter() {
            if hidden.contains(id.as_str()) {
                continue;
            }
            let mut visible = Vec::new();
            let mut skipped = HashSet::new();
            self.collect_visible_parents(parents, &mut visible, &mut skipped);
            out.insert(id.clone(), visible);
        }
        out
    }

    fn collect_visible_parents(
        &self,
        parents: &[AncestorItem],
        out: &mut Vec<ItemId>,
        skipped: &mut HashSet<ItemId>,
    ) {
        for parent in parents {
            if parent.is_hidden {
                if skipped.insert(parent.id.clone()) {
                    if let Some(grand_parents) = self.items.get(&parent.id) {
                        self.collect_visible_parents(grand_parents, out, skipped);
                    }
                }
            } else if !out.contains(&parent.id) {
                out.push(parent.id.clone());
            }
        }
    }

    /// Breadth-first walk up from `ids`, asking `predicate` about every
    /// parent the first time it is reached. Returns the first parent the
    /// predicate accepts. The starting ids themselves are never tested.
    pub async fn find_closest_parent<F, Fut>(
        &self,
        ids: &[ItemId],
        mut predicate: F,
    ) -> Option<ItemId>
    where
        F: FnMut(ItemId) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut visited: HashSet<ItemId> = ids.iter().cloned().collect();
        let mut queue: VecDeque<ItemId> = ids.iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            let Some(parents) = self.items.get(&current) else {
                continue;
            };
            for parent in parents {
                if !visited.insert(parent.id.clone()) {
                    continue;
                }
                if predicate(parent.id.clone()).await {
                    return Some(parent.id.clone());
                }
                queue.push_back(parent.id.clone());
            }
        }
        None
    }

    /// Every parent edge in the graph, one per parent id.
    pub fn get_all_items_flat(&self) -> Vec<AncestorItem> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in sorted_keys(self) {
            for parent in &self.items[id] {
                if seen.insert(parent.id.as_str()) {
                    out.push(parent.clone());
                }
            }
        }
        out
    }

    /// All transitive ancestors of `id` (not including `id`).
    pub fn ancestor_ids(&self, id: &str) -> HashSet<ItemId> {
        self.ancestor_items(id)
            .into_iter()
            .map(|item| item.id)
            .collect()
    }

    /// Transitive ancestors of `id` with their flags, nearest first, one
    /// entry per ancestor id.
    pub fn ancestor_items(&self, id: &str) -> Vec<AncestorItem> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for parent in self.get(&current).unwrap_or_default() {
                if seen.insert(parent.id.clone()) {
                    out.push(parent.clone());
                    queue.push_back(parent.id.clone());
                }
            }
        }
        out
    }

    pub fn is_descendant_of(&self, id: &str, ancestor_id: &str) -> bool {
        self.ancestor_ids(id).contains(ancestor_id)
    }

    /// Whether some path from `id` up to a root avoids every hidden
    /// collection. Roots and ids missing from the graph count as visible.
    pub fn has_visible_parent_path(&self, id: &str) -> bool {
        let mut visited = HashSet::new();
        self.visible_path(id, &mut visited)
    }

    fn visible_path(&self, id: &str, visited: &mut HashSet<ItemId>) -> bool {
        let parents = match self.items.get(id) {
            Some(parents) if !parents.is_empty() => parents,
            _ => return true,
        };
        if !visited.insert(id.to_string()) {
            return false;
        }
        parents
            .iter()
            .any(|parent| !parent.is_hidden && self.visible_path(&parent.id, visited))
    }
}

impl FromIterator<(ItemId, Vec<AncestorItem>)> for Ancestors {
    fn from_iter<T: IntoIterator<Item = (ItemId, Vec<AncestorItem>)>>(iter: T) -> Self {
        Self::from_items(iter.into_iter().collect())
    }
}

fn sorted_keys(ancestors: &Ancestors) -> Vec<&ItemId> {
    let mut keys: Vec<&ItemId> = ancestors.items.keys().collect();
    keys.sort();
    keys
}
