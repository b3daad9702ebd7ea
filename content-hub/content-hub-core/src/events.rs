use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::ItemId;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum HierarchyEvent {
    ElementAdded { collection_id: ItemId, element_id: ItemId },
    ElementRemoved { collection_id: ItemId, element_id: ItemId },
    ElementRestored { collection_id: ItemId, element_id: ItemId },
    ElementMoved { element_id: ItemId, from: ItemId, to: ItemId },
    CollectionUpdated { collection_id: ItemId },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HierarchyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: HierarchyEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
