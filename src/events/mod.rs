use async_trait::async_trait;
use chrono::NaiveDate;
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
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Batch events
    BatchCreated {
        batch_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        expiration_date: NaiveDate,
    },
    BatchRestocked {
        batch_id: Uuid,
        quantity: i32,
    },
    BatchAdjusted {
        batch_id: Uuid,
        delta: i32,
        new_quantity: i32,
    },
    BatchMarkedOut {
        batch_id: Uuid,
        removed: i32,
    },
    BatchExpired {
        batch_id: Uuid,
        removed: i32,
        released_reservations: u64,
    },
    BatchDeleted(Uuid),

    // Reservation events
    StockReserved {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        batches: Vec<Uuid>,
    },
    ReservationsReleased {
        order_id: Uuid,
        count: u64,
    },
    ReservationsConsumed {
        order_id: Uuid,
        count: u64,
    },
    ReservationExpired {
        reservation_id: Uuid,
        batch_id: Uuid,
        quantity: i32,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        kiosk_user_id: i64,
    },
    OrderAccepted(Uuid),
    OrderRejected(Uuid),
    OrderAutoRejected(Uuid),
    OrderReadyForPayment(Uuid),
    OrderPaid(Uuid),
    OrderCancelRequested(Uuid),
    OrderCancelled(Uuid),
    OrderPaymentTimedOut(Uuid),

    // Checkout session events
    CheckoutSessionCreated {
        session_id: Uuid,
        order_count: usize,
    },
    CheckoutSessionCompleted(Uuid),
    CheckoutSessionCancelled(Uuid),
    CheckoutSessionExpired(Uuid),
}

// Define a trait for handling events. Handlers implementing this trait will process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

// Function to process incoming events and distribute them to registered event handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::StockReserved {
                order_id,
                product_id,
                quantity,
                ref batches,
            } => {
                info!(
                    "Stock reserved: order={}, product={}, quantity={}, batches={}",
                    order_id,
                    product_id,
                    quantity,
                    batches.len()
                );
            }
            Event::ReservationExpired {
                reservation_id,
                batch_id,
                quantity,
            } => {
                warn!(
                    "Reservation {} expired: returned {} units to batch {}",
                    reservation_id, quantity, batch_id
                );
            }
            Event::BatchExpired {
                batch_id,
                removed,
                released_reservations,
            } => {
                warn!(
                    "Batch {} expired: removed {} units, released {} active holds",
                    batch_id, removed, released_reservations
                );
            }
            Event::OrderAutoRejected(order_id) => {
                warn!("Order {} auto-rejected: kiosk response window elapsed", order_id);
            }
            Event::OrderPaymentTimedOut(order_id) => {
                warn!("Order {} cancelled: payment window elapsed", order_id);
            }
            Event::CheckoutSessionExpired(session_id) => {
                info!("Checkout session {} expired", session_id);
            }
            _ => {
                info!("Received event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender
            .send(Event::OrderPaid(Uuid::new_v4()))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(Event::OrderPaid(_))));
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::OrderCancelled(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
