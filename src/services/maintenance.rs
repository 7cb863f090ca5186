//! Background maintenance loops.
//!
//! Deadlines are written on the rows and checked by the state-machine
//! guards, so these sweeps only tidy up: they move overdue rows to their
//! terminal states and return held stock. Two cadences run, a fast loop
//! for holds, orders, and sessions, and a slow one for date-expired
//! batches.

use std::time::Duration;

use tokio::time::sleep;
use tracing::error;

use crate::services::batches::BatchService;
use crate::services::checkout::CheckoutService;
use crate::services::orders::OrderService;
use crate::services::reservations::ReservationService;

#[derive(Clone)]
pub struct Sweepers {
    pub reservations: ReservationService,
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub batches: BatchService,
}

impl Sweepers {
    /// One pass of the fast sweep. Sessions go first so their orders are
    /// cancelled as a unit; the order sweeps then catch stragglers, and the
    /// reservation sweep returns any holds left behind.
    pub async fn run_deadline_sweep(&self, batch_size: u64) {
        if let Err(e) = self.checkout.process_expired_sessions(batch_size).await {
            error!("Checkout session sweep failed: {}", e);
        }
        if let Err(e) = self.orders.auto_reject_timed_out(batch_size).await {
            error!("Order auto-reject sweep failed: {}", e);
        }
        if let Err(e) = self.orders.cancel_payment_overdue(batch_size).await {
            error!("Payment timeout sweep failed: {}", e);
        }
        if let Err(e) = self.reservations.process_expired(batch_size).await {
            error!("Reservation sweep failed: {}", e);
        }
    }

    pub async fn run_batch_expiry_sweep(&self, batch_size: u64) {
        if let Err(e) = self.batches.expire_due_batches(batch_size).await {
            error!("Batch expiry sweep failed: {}", e);
        }
    }
}

/// Spawns the maintenance loops. Returns immediately; the loops run for
/// the life of the process.
pub fn start_sweepers(
    sweepers: Sweepers,
    sweep_interval: Duration,
    batch_expiry_interval: Duration,
    batch_size: u64,
) {
    let fast = sweepers.clone();
    tokio::spawn(async move {
        loop {
            sleep(sweep_interval).await;
            fast.run_deadline_sweep(batch_size).await;
        }
    });

    tokio::spawn(async move {
        // Runs once at startup so a restart never leaves yesterday's
        // batches on sale for a full extra day.
        loop {
            sweepers.run_batch_expiry_sweep(batch_size).await;
            sleep(batch_expiry_interval).await;
        }
    });
}
