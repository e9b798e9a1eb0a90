use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the manufacturing core.
///
/// Services send these after their transaction commits; consumers must treat
/// them as at-most-once notifications, not as the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Production events
    ProductionConfirmed {
        confirmation_id: Uuid,
        operation_id: Uuid,
        order_line_item_id: Uuid,
        produced_quantity: Decimal,
        status: String,
    },
    ConfirmationRejected {
        confirmation_id: Uuid,
        reason: String,
    },

    // Batch events
    BatchCreated {
        batch_id: Uuid,
        batch_number: String,
        created_via: String,
        quantity: Decimal,
    },
    BatchQualityDecided {
        batch_id: Uuid,
        accepted: bool,
    },
    GenealogyLinked {
        parent_batch_id: Uuid,
        child_batch_id: Uuid,
        quantity_consumed: Decimal,
    },

    // Inventory events
    InventoryStateChanged {
        inventory_id: Uuid,
        old_state: String,
        new_state: String,
    },
    InventoryConsumed {
        inventory_id: Uuid,
        operation_id: Uuid,
        quantity: Decimal,
    },
    InventoryReceived {
        inventory_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
    },

    // Routing events
    RoutingInstantiated {
        routing_id: Uuid,
        order_line_item_id: Uuid,
        operation_count: usize,
    },
    OperationActivated {
        operation_id: Uuid,
        sequence_number: i32,
    },
    OperationConfirmed {
        operation_id: Uuid,
    },

    // Hold events
    HoldApplied {
        hold_id: Uuid,
        entity_type: String,
        entity_id: Uuid,
    },
    HoldReleased {
        hold_id: Uuid,
        entity_type: String,
        entity_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ProductionConfirmed { .. } => "production_confirmed",
            Event::ConfirmationRejected { .. } => "confirmation_rejected",
            Event::BatchCreated { .. } => "batch_created",
            Event::BatchQualityDecided { .. } => "batch_quality_decided",
            Event::GenealogyLinked { .. } => "genealogy_linked",
            Event::InventoryStateChanged { .. } => "inventory_state_changed",
            Event::InventoryConsumed { .. } => "inventory_consumed",
            Event::InventoryReceived { .. } => "inventory_received",
            Event::RoutingInstantiated { .. } => "routing_instantiated",
            Event::OperationActivated { .. } => "operation_activated",
            Event::OperationConfirmed { .. } => "operation_confirmed",
            Event::HoldApplied { .. } => "hold_applied",
            Event::HoldReleased { .. } => "hold_released",
        }
    }
}

/// A timestamped envelope, useful for consumers that persist events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: Event,
    pub occurred_at: DateTime<Utc>,
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

    /// Sends an event, logging and discarding any failure. Business
    /// operations never fail because a consumer went away.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, "dropping event: {}", e);
        }
    }
}

/// Creates an event channel with the given buffer size.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains an event receiver, logging each event. Useful as a default consumer
/// when no real subscriber is wired up.
pub async fn log_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = event.name(), payload = ?event, "event");
    }
}
