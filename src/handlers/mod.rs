pub mod batches;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod reservations;
pub mod stock_movements;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::batches::BatchService;
use crate::services::checkout::CheckoutService;
use crate::services::maintenance::Sweepers;
use crate::services::orders::OrderService;
use crate::services::reservations::ReservationService;
use crate::services::stock_movements::StockMovementService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub batches: Arc<BatchService>,
    pub stock_movements: Arc<StockMovementService>,
    pub reservations: Arc<ReservationService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    /// Build the AppServices container, wiring every service to the shared
    /// pool, event channel, and the configured deadline windows.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let batches = Arc::new(BatchService::new(db_pool.clone(), event_sender.clone()));
        let stock_movements = Arc::new(StockMovementService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let reservations = Arc::new(ReservationService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            config.payment_window(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool,
            event_sender,
            config.reservation_window(),
            config.kiosk_response_window(),
            config.payment_window(),
        ));

        Self {
            batches,
            stock_movements,
            reservations,
            orders,
            checkout,
        }
    }

    /// Bundle for the background maintenance loops.
    pub fn sweepers(&self) -> Sweepers {
        Sweepers {
            reservations: self.reservations.as_ref().clone(),
            orders: self.orders.as_ref().clone(),
            checkout: self.checkout.as_ref().clone(),
            batches: self.batches.as_ref().clone(),
        }
    }
}
