pub mod ancestors;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod model;
pub mod permissions;
pub mod resolver;
pub mod search;

pub use ancestors::{AncestorItem, Ancestors, DocumentAncestors};
pub use cache::{
    KeyValueStore, MemoryKeyValueStore, RedisKeyValueStore, RequestScopedAncestorCache,
    TieredAncestorCache,
};
pub use config::HubConfig;
pub use error::Error;
pub use hierarchy::{HierarchyEditor, HierarchyStore, MemoryCollectionStore};
pub use model::{Collection, CollectionElement, ItemId, ItemKind};
pub use resolver::{AncestorResolver, CollectionStore, ParentResolver, StoreParentSource};
