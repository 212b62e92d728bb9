use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without waiting on a full channel or failing the caller.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.sender.try_send(event) {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after a transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        total_amount: Decimal,
        payment_method: String,
    },
    OrderPaymentFailed {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        reason: String,
    },
    OrderPaymentRetried {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
        changed_at: DateTime<Utc>,
    },
    OrderItemCancelled {
        order_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    ReturnRequested {
        order_id: Uuid,
        item_ids: Vec<Uuid>,
    },
    ReturnResolved {
        order_id: Uuid,
        accepted: Vec<Uuid>,
        rejected: Vec<Uuid>,
    },
    WalletCredited {
        user_id: Uuid,
        amount: Decimal,
        source: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderPaymentFailed { .. } => "order_payment_failed",
            Event::OrderPaymentRetried { .. } => "order_payment_retried",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderItemCancelled { .. } => "order_item_cancelled",
            Event::ReturnRequested { .. } => "return_requested",
            Event::ReturnResolved { .. } => "return_resolved",
            Event::WalletCredited { .. } => "wallet_credited",
        }
    }
}

/// Drains the event channel. Notification delivery (email, SMS) hangs off this loop
/// and must never feed back into the request that produced the event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_number,
                user_id,
                total_amount,
                payment_method,
                ..
            } => info!(
                %order_number, %user_id, %total_amount, %payment_method,
                "order placed"
            ),
            Event::OrderPaymentFailed {
                order_number,
                user_id,
                reason,
                ..
            } => warn!(%order_number, %user_id, %reason, "order payment failed"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                ..
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            other => info!(event = other.name(), payload = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
