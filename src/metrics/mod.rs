/*!
 * # Metrics Module
 *
 * Prometheus counters for the business-level operations of the API, exposed
 * in Prometheus text format at `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    pub static ref STOCK_MOVEMENTS_RECORDED: IntCounter = register_int_counter!(
        "stock_movements_recorded_total",
        "Total number of stock movements appended to the ledger"
    )
    .expect("metric can be created");
    pub static ref RESERVATIONS_CREATED: IntCounter = register_int_counter!(
        "reservations_created_total",
        "Total number of batch reservations created"
    )
    .expect("metric can be created");
    pub static ref RESERVATIONS_EXPIRED: IntCounter = register_int_counter!(
        "reservations_expired_total",
        "Total number of reservations expired by the sweeper"
    )
    .expect("metric can be created");
    pub static ref BATCHES_EXPIRED: IntCounter = register_int_counter!(
        "batches_expired_total",
        "Total number of batches expired by the date sweeper"
    )
    .expect("metric can be created");
    pub static ref ORDERS_CREATED: IntCounter = register_int_counter!(
        "orders_created_total",
        "Total number of vendor orders created at checkout"
    )
    .expect("metric can be created");
    pub static ref ORDERS_AUTO_REJECTED: IntCounter = register_int_counter!(
        "orders_auto_rejected_total",
        "Total number of orders auto-rejected after the kiosk response window"
    )
    .expect("metric can be created");
    pub static ref ORDERS_PAYMENT_TIMED_OUT: IntCounter = register_int_counter!(
        "orders_payment_timed_out_total",
        "Total number of accepted orders cancelled after the payment window"
    )
    .expect("metric can be created");
    pub static ref CHECKOUTS_COMPLETED: IntCounter = register_int_counter!(
        "checkouts_completed_total",
        "Total number of checkout sessions settled by a successful payment"
    )
    .expect("metric can be created");
    pub static ref CHECKOUT_FAILURES: IntCounter = register_int_counter!(
        "checkout_failures_total",
        "Total number of checkouts aborted for insufficient stock or validation"
    )
    .expect("metric can be created");
}

/// Renders all registered metrics in Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_render() {
        let before = ORDERS_CREATED.get();
        ORDERS_CREATED.inc();
        assert_eq!(ORDERS_CREATED.get(), before + 1);

        let output = render();
        assert!(output.contains("orders_created_total"));
    }
}
