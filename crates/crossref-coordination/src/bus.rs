//! Cross-instance notifications.
//!
//! The transport belongs to the host; [`BroadcastBus`] is an in-process
//! implementation over a tokio broadcast channel. Delivery is assumed to
//! be at-least-once, so receivers must treat every message as idempotent.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crossref_types::{ContentHash, DocumentId};

/// Buffered messages per subscriber before it starts lagging.
pub const BUS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    LeaseAcquired {
        scope: String,
        holder_id: String,
    },
    LeaseReleased {
        scope: String,
        holder_id: String,
    },
    LeaseStolen {
        scope: String,
        holder_id: String,
        previous_holder: String,
    },
    /// A document's entries and edges were published by `origin`.
    DocumentIndexed {
        origin: String,
        document_id: DocumentId,
        content_hash: ContentHash,
    },
    /// A document was unregistered by `origin`.
    DocumentPurged {
        origin: String,
        document_id: DocumentId,
    },
}

impl BusMessage {
    /// Instance that caused a document message, so it can skip its own.
    pub fn origin(&self) -> Option<&str> {
        match self {
            BusMessage::DocumentIndexed { origin, .. } | BusMessage::DocumentPurged { origin, .. } => {
                Some(origin)
            }
            BusMessage::LeaseAcquired { holder_id, .. }
            | BusMessage::LeaseReleased { holder_id, .. }
            | BusMessage::LeaseStolen { holder_id, .. } => Some(holder_id),
        }
    }
}

pub trait MessageBus: Send + Sync {
    /// Fire and forget. Having no subscribers is not an error.
    fn publish(&self, message: BusMessage);

    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// In-process bus. Clones share one channel.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for BroadcastBus {
    fn publish(&self, message: BusMessage) {
        let _ = self.tx.send(message);
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}
