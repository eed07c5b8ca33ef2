//! Store events — the typed publish/subscribe surface for collaborators.
//!
//! DESIGN
//! ======
//! The store publishes; UI layers, tests, and alternate front ends subscribe.
//! The engine never consumes its own events. Delivery is best-effort: a
//! publish with no subscribers is not an error, and a lagging subscriber
//! loses the oldest events rather than blocking the store.

use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::state::{CanvasKind, ChatMessage};

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ConversationCreated {
        id: Uuid,
    },
    ConversationUpdated {
        id: Uuid,
        message: ChatMessage,
        /// Message count after the append.
        total: usize,
    },
    CanvasActivated {
        element_id: String,
        conversation_id: Uuid,
        kind: CanvasKind,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: StoreEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "no event subscribers");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
