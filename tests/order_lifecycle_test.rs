//! End-to-end tests for the per-vendor order lifecycle.
//!
//! Tests cover the full journey:
//! - Checkout creating a pending order with holds
//! - Kiosk accept and reject
//! - Payment consuming the held stock
//! - Pre-payment cancellation
//! - Post-payment cancellation request and finalization
//! - Timeout sweeps for unresponsive kiosks and unpaid orders

mod common;

use chrono::{Duration, Utc};
use common::{today, TestApp};
use feria_api::entities::batch_reservation::ReservationStatus;
use feria_api::entities::order::OrderStatus;
use feria_api::entities::stock_movement::StockMovementType;
use feria_api::errors::ServiceError;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

struct PlacedOrder {
    app: TestApp,
    batch_id: Uuid,
    order_id: Uuid,
}

// One product, one 100-unit lot, one order for 10 of it.
async fn place_order() -> PlacedOrder {
    let app = TestApp::new().await;
    let product = app.seed_product(3, dec!(1.5), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 100)
        .await
        .expect("create batch");

    let user_id = Uuid::new_v4();
    let cart = app.seed_cart(user_id, &[(product.id, 10)]).await;
    let details = app
        .services
        .checkout
        .create_from_cart(user_id, cart.id)
        .await
        .expect("checkout");
    let order_id = details.orders[0].order.id;

    PlacedOrder {
        app,
        batch_id: batch.id,
        order_id,
    }
}

// ==================== Happy Path Tests ====================

#[tokio::test]
async fn accepted_and_paid_order_consumes_the_held_stock() {
    let placed = place_order().await;
    let app = &placed.app;

    let details = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .expect("get order");
    assert_eq!(details.order.status, "PENDING_KIOSK_CONFIRMATION");
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 10);
    assert_eq!(details.items[0].subtotal, dec!(15.0));

    let accepted = app
        .services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");
    assert_eq!(accepted.status, "ACCEPTED");
    assert!(accepted.accepted_at.is_some());
    assert!(accepted.expires_at.expect("payment deadline") > Utc::now());

    let paid = app
        .services
        .orders
        .mark_paid(placed.order_id, Some(json!({"method": "card"})))
        .await
        .expect("pay");
    assert_eq!(paid.status, "PAID");
    assert!(paid.paid_at.is_some());

    // 100 on the shelf minus the 10 sold, nothing left on hold.
    let batch = app.get_batch(placed.batch_id).await;
    assert_eq!(batch.current_quantity, 90);
    assert_eq!(batch.reserved_quantity, 0);

    let movements = app
        .services
        .stock_movements
        .movements_for_batch(placed.batch_id)
        .await
        .expect("list movements");
    assert_eq!(
        movements.last().map(|m| m.movement_type),
        Some(StockMovementType::Sale)
    );
    assert_eq!(movements.last().map(|m| m.delta), Some(-10));

    let check = app
        .services
        .stock_movements
        .verify_ledger(placed.batch_id)
        .await
        .expect("verify ledger");
    assert!(check.consistent);
    assert_eq!(check.movement_sum, 90);

    let holds = app
        .services
        .reservations
        .list_for_order(placed.order_id)
        .await
        .expect("list holds");
    assert!(holds.iter().all(|h| h.status == ReservationStatus::Consumed));
}

#[tokio::test]
async fn ready_for_payment_freezes_the_order_with_a_deadline() {
    let placed = place_order().await;
    let app = &placed.app;

    app.services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");

    let deadline = Utc::now() + Duration::minutes(20);
    let ready = app
        .services
        .orders
        .mark_ready_for_payment(placed.order_id, deadline)
        .await
        .expect("ready for payment");
    assert_eq!(ready.status, "READY_FOR_PAYMENT");
    assert_eq!(ready.expires_at, Some(deadline));

    let paid = app
        .services
        .orders
        .mark_paid(placed.order_id, None)
        .await
        .expect("pay");
    assert_eq!(paid.status, "PAID");
}

// ==================== Rejection and Cancellation Tests ====================

#[tokio::test]
async fn rejected_order_releases_its_holds() {
    let placed = place_order().await;
    let app = &placed.app;

    let rejected = app
        .services
        .orders
        .reject_order(placed.order_id)
        .await
        .expect("reject");
    assert_eq!(rejected.status, "REJECTED");
    assert!(rejected.rejected_at.is_some());

    let batch = app.get_batch(placed.batch_id).await;
    assert_eq!(batch.current_quantity, 100);
    assert_eq!(batch.reserved_quantity, 0);
}

#[tokio::test]
async fn buyer_can_cancel_until_payment() {
    let placed = place_order().await;
    let app = &placed.app;

    app.services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");
    let cancelled = app
        .services
        .orders
        .cancel_order(placed.order_id)
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, "CANCELLED");

    let batch = app.get_batch(placed.batch_id).await;
    assert_eq!(batch.current_quantity, 100);
    assert_eq!(batch.reserved_quantity, 0);
}

#[tokio::test]
async fn paid_orders_need_a_cancellation_request() {
    let placed = place_order().await;
    let app = &placed.app;

    app.services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");
    app.services
        .orders
        .mark_paid(placed.order_id, None)
        .await
        .expect("pay");

    // Direct cancellation is closed once money moved.
    let err = app
        .services
        .orders
        .cancel_order(placed.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    let requested = app
        .services
        .orders
        .request_cancellation(placed.order_id)
        .await
        .expect("request cancellation");
    assert_eq!(requested.status, "CANCEL_REQUESTED");

    let finalized = app
        .services
        .orders
        .finalize_cancellation(placed.order_id)
        .await
        .expect("finalize cancellation");
    assert_eq!(finalized.status, "CANCELLED");

    // The sale already happened; finalizing does not restock by itself.
    let batch = placed.app.get_batch(placed.batch_id).await;
    assert_eq!(batch.current_quantity, 90);
    assert_eq!(batch.reserved_quantity, 0);
}

#[tokio::test]
async fn cancellation_requests_need_a_paid_order() {
    let placed = place_order().await;
    let app = &placed.app;

    let err = app
        .services
        .orders
        .request_cancellation(placed.order_id)
        .await
        .unwrap_err();
    match err {
        ServiceError::InvalidStatus(msg) => {
            assert!(msg.contains("only be requested for paid orders"), "got: {msg}")
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = app
        .services
        .orders
        .finalize_cancellation(placed.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));
}

// ==================== Invalid Transition Tests ====================

#[tokio::test]
async fn settled_orders_refuse_further_kiosk_decisions() {
    let placed = place_order().await;
    let app = &placed.app;

    app.services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");

    for result in [
        app.services.orders.accept_order(placed.order_id).await,
        app.services.orders.reject_order(placed.order_id).await,
    ] {
        match result.unwrap_err() {
            ServiceError::InvalidStatus(msg) => {
                assert!(msg.contains("ACCEPTED"), "got: {msg}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test]
async fn payment_requires_an_accepted_order() {
    let placed = place_order().await;
    let app = &placed.app;

    let err = app
        .services
        .orders
        .mark_paid(placed.order_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    let err = app
        .services
        .orders
        .mark_ready_for_payment(placed.order_id, Utc::now() + Duration::minutes(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn unknown_orders_are_not_found() {
    let app = TestApp::new().await;
    let err = app.services.orders.get_order(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

// ==================== Timeout Sweep Tests ====================

#[tokio::test]
async fn unanswered_orders_are_auto_rejected() {
    let placed = place_order().await;
    let app = &placed.app;

    app.backdate_order(placed.order_id).await;
    let sweep = app
        .services
        .orders
        .auto_reject_timed_out(50)
        .await
        .expect("sweep");
    assert_eq!(sweep.processed, 1);
    assert_eq!(sweep.failed, 0);

    let details = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .expect("get order");
    assert_eq!(details.order.status, "AUTO_REJECTED_TIMEOUT");
    assert!(details.order.rejected_at.is_some());

    let batch = app.get_batch(placed.batch_id).await;
    assert_eq!(batch.reserved_quantity, 0);

    // Nothing due on the next pass.
    let sweep = app
        .services
        .orders
        .auto_reject_timed_out(50)
        .await
        .expect("second sweep");
    assert_eq!(sweep.processed, 0);
}

#[tokio::test]
async fn unpaid_orders_are_cancelled_after_the_payment_window() {
    let placed = place_order().await;
    let app = &placed.app;

    app.services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");
    app.backdate_order(placed.order_id).await;

    let sweep = app
        .services
        .orders
        .cancel_payment_overdue(50)
        .await
        .expect("sweep");
    assert_eq!(sweep.processed, 1);

    let details = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .expect("get order");
    assert_eq!(details.order.status, "CANCELLED");

    let batch = app.get_batch(placed.batch_id).await;
    assert_eq!(batch.current_quantity, 100);
    assert_eq!(batch.reserved_quantity, 0);
}

#[tokio::test]
async fn payment_sweep_leaves_fresh_orders_alone() {
    let placed = place_order().await;
    let app = &placed.app;

    app.services
        .orders
        .accept_order(placed.order_id)
        .await
        .expect("accept");

    let sweep = app
        .services
        .orders
        .cancel_payment_overdue(50)
        .await
        .expect("sweep");
    assert_eq!(sweep.processed, 0);

    let details = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .expect("get order");
    assert_eq!(details.order.status, "ACCEPTED");
}

// ==================== Listing Tests ====================

#[tokio::test]
async fn orders_are_listed_per_kiosk_and_per_user() {
    let app = TestApp::new().await;
    let product = app.seed_product(3, dec!(1.5), 10).await;
    app.services
        .batches
        .create_batch(product.id, today(), 100)
        .await
        .expect("create batch");

    let user_id = Uuid::new_v4();
    for _ in 0..3 {
        let cart = app.seed_cart(user_id, &[(product.id, 1)]).await;
        app.services
            .checkout
            .create_from_cart(user_id, cart.id)
            .await
            .expect("checkout");
    }

    let for_kiosk = app
        .services
        .orders
        .list_for_kiosk(3, None, 1, 20)
        .await
        .expect("list for kiosk");
    assert_eq!(for_kiosk.total, 3);
    assert_eq!(for_kiosk.orders.len(), 3);

    let for_user = app
        .services
        .orders
        .list_for_user(user_id, Some(OrderStatus::PendingKioskConfirmation), 1, 2)
        .await
        .expect("list for user");
    assert_eq!(for_user.total, 3);
    assert_eq!(for_user.orders.len(), 2, "page size caps the result");
    assert_eq!(for_user.page, 1);

    let accepted = app
        .services
        .orders
        .list_for_user(user_id, Some(OrderStatus::Accepted), 1, 20)
        .await
        .expect("list accepted");
    assert_eq!(accepted.total, 0);

    let other_kiosk = app
        .services
        .orders
        .list_for_kiosk(99, None, 1, 20)
        .await
        .expect("list other kiosk");
    assert_eq!(other_kiosk.total, 0);
}
