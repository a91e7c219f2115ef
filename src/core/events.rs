use crate::core::model::{ItemId, ItemStatus, Visibility};

#[derive(Debug, Clone)]
pub enum QueueEvent {
    QueueRunning { running: bool },
    ItemAdded { item_id: ItemId, name: String, size: u64, visibility: Visibility },
    ItemRemoved { item_id: ItemId },
    VisibilityChanged { item_id: ItemId, visibility: Visibility },
    ItemStatusChanged { item_id: ItemId, status: ItemStatus },
    Progress {
        item_id: ItemId,
        sent: u64,
        total: u64,
        percent: f64,
    },
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}
