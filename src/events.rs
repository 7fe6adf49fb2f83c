//! Domain events emitted when business records are created.
//!
//! Nothing in the gateway consumes these yet; they exist so later workflows
//! (notifications, risk metrics) can subscribe without touching the pipeline.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    EmailCreated {
        email_id: Uuid,
        owner: String,
        trace_id: String,
    },
    ScanLogged {
        scan_id: Uuid,
        email_id: Option<Uuid>,
        result: String,
        trace_id: String,
    },
}

/// Broadcast fan-out for domain events.
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn publish(&self, event: DomainEvent) {
        trace!(?event, "Publishing domain event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
