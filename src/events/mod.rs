use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events emitted by the reconciliation engine.
///
/// Delivery is best-effort: a failed send is logged by the caller and never
/// fails the originating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    OrderRestored(Uuid),
    OrderPosted(Uuid),
    ErpOrderNumberRecorded {
        order_id: Uuid,
        ps_order_number: String,
    },
    LineAdded {
        order_id: Uuid,
        line_id: Uuid,
    },
    LineCancelled {
        order_id: Uuid,
        line_id: Uuid,
    },
    LineRestored {
        order_id: Uuid,
        line_id: Uuid,
    },
    SkuResolved {
        order_id: Uuid,
        line_id: Uuid,
        resolved_sku: String,
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

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}
