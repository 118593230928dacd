//! Domain events emitted by the reconciliation engine.
//!
//! Email dispatch and downstream export consume these; the engine itself
//! only publishes. Event delivery failure never fails the operation that
//! produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Events that can occur while synchronizing with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_no: String,
        remote_order_id: String,
    },
    OrderSubmitted {
        order_no: String,
    },
    OrderFailed {
        order_no: String,
        reason: String,
    },
    OrderCancelled {
        order_no: String,
    },
    FraudStopped {
        order_no: String,
    },
    /// Consumed by the storefront's mail dispatcher.
    ConfirmationEmailRequested {
        order_no: String,
        email: String,
    },
    RemoteCallFailed {
        operation: String,
        detail: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Channel pair for wiring; the receiver side belongs to the consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event delivery failed: {}", e);
        }
    }
}
