//! Store-facing item model: collections and the elements they contain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ItemId = String;

/// Different kinds of items managed by the repository.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Document,
    Collection,
    Publication,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Document => "document",
            ItemKind::Collection => "collection",
            ItemKind::Publication => "publication",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionElement {
    pub key: ItemId,
    pub kind: ItemKind,
}

impl CollectionElement {
    pub fn document(key: impl Into<ItemId>) -> Self {
        Self {
            key: key.into(),
            kind: ItemKind::Document,
        }
    }

    pub fn collection(key: impl Into<ItemId>) -> Self {
        Self {
            key: key.into(),
            kind: ItemKind::Collection,
        }
    }
}

/// A collection as the document store returns it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: ItemId,
    #[serde(default)]
    pub elements: Vec<CollectionElement>,
    /// Soft-deleted memberships. They still count as parent links so that
    /// trash and recovery flows can resolve ancestors.
    #[serde(default)]
    pub deleted_elements: Vec<CollectionElement>,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default = "default_show_in_overview")]
    pub show_in_overview: bool,
    #[serde(default)]
    pub deletion_time: Option<DateTime<Utc>>,
}

fn default_show_in_overview() -> bool {
    true
}

impl Collection {
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            elements: Vec::new(),
            deleted_elements: Vec::new(),
            is_hidden: false,
            show_in_overview: true,
            deletion_time: None,
        }
    }

    pub fn with_element(mut self, element: CollectionElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn hidden(mut self, is_hidden: bool) -> Self {
        self.is_hidden = is_hidden;
        self
    }

    pub fn advertised(mut self, show_in_overview: bool) -> Self {
        self.show_in_overview = show_in_overview;
        self
    }

    pub fn contains(&self, key: &str, include_soft_deleted: bool) -> bool {
        self.elements.iter().any(|el| el.key == key)
            || (include_soft_deleted && self.deleted_elements.iter().any(|el| el.key == key))
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_time.is_some()
    }

    /// Keys of every element, active or soft-deleted.
    pub fn member_keys(&self) -> Vec<ItemId> {
        self.elements
            .iter()
            .chain(self.deleted_elements.iter())
            .map(|el| el.key.clone())
            .collect()
    }
}
