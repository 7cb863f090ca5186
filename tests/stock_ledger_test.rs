//! Integration tests for the batch stock ledger.
//!
//! Tests cover:
//! - Opening RESTOCK movement written at batch creation
//! - Lot numbering within a production day
//! - Movement sign rules and oversell rejection
//! - Guards on expired and depleted batches
//! - Manual out-of-stock flow
//! - Ledger replay against the stored quantity

mod common;

use common::{days_from_today, today, TestApp};
use feria_api::entities::batch::{self, BatchStatus};
use feria_api::entities::product;
use feria_api::entities::stock_movement::StockMovementType;
use feria_api::errors::ServiceError;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};

// ==================== Batch Creation Tests ====================

#[tokio::test]
async fn creating_a_batch_writes_the_opening_restock() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(2.5), 10).await;

    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 50)
        .await
        .expect("create batch");

    assert_eq!(batch.current_quantity, 50);
    assert_eq!(batch.initial_quantity, 50);
    assert_eq!(batch.reserved_quantity, 0);
    assert_eq!(batch.status, BatchStatus::Active);
    assert_eq!(batch.expiration_date, days_from_today(10));

    let movements = app
        .services
        .stock_movements
        .movements_for_batch(batch.id)
        .await
        .expect("list movements");
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, StockMovementType::Restock);
    assert_eq!(movements[0].delta, 50);

    let check = app
        .services
        .stock_movements
        .verify_ledger(batch.id)
        .await
        .expect("verify ledger");
    assert!(check.consistent);
    assert_eq!(check.movement_sum, 50);
}

#[tokio::test]
async fn lot_numbers_count_up_within_a_production_day() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(2.5), 10).await;

    let first = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("first batch");
    let second = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("second batch");

    let prefix = format!("LOTE-{}-", today().format("%Y%m%d"));
    assert!(first.batch_number.starts_with(&prefix));
    assert!(first.batch_number.ends_with("-001"));
    assert!(second.batch_number.ends_with("-002"));
}

#[tokio::test]
async fn batch_creation_rejects_bad_input() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(2.5), 2).await;

    let err = app
        .services
        .batches
        .create_batch(product.id, today(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    // Production five days back with two days of shelf life is already expired.
    let err = app
        .services
        .batches
        .create_batch(product.id, days_from_today(-5), 10)
        .await
        .unwrap_err();
    match err {
        ServiceError::ValidationError(msg) => {
            assert!(msg.contains("already in the past"), "got: {msg}")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn inactive_products_refuse_new_lots() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(2.5), 10).await;

    let mut update: product::ActiveModel = product.clone().into();
    update.active = Set(false);
    update
        .update(app.db.as_ref())
        .await
        .expect("deactivate product");

    let err = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .unwrap_err();
    match err {
        ServiceError::ValidationError(msg) => assert!(msg.contains("not active"), "got: {msg}"),
        other => panic!("unexpected error: {other}"),
    }
}

// ==================== Movement Rule Tests ====================

#[tokio::test]
async fn sale_movements_deplete_and_flip_status() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("create batch");

    let (batch, movement) = app
        .services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -10)
        .await
        .expect("sale");

    assert_eq!(batch.current_quantity, 0);
    assert_eq!(batch.status, BatchStatus::Depleted);
    assert_eq!(movement.delta, -10);

    let check = app
        .services
        .stock_movements
        .verify_ledger(batch.id)
        .await
        .expect("verify ledger");
    assert!(check.consistent);
    assert_eq!(check.movement_sum, 0);
}

#[tokio::test]
async fn overselling_a_batch_is_rejected_without_a_ledger_row() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("create batch");

    let err = app
        .services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -15)
        .await
        .unwrap_err();
    match err {
        ServiceError::InsufficientStock(msg) => {
            assert!(msg.contains("Requested: 15, Available: 10"), "got: {msg}")
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(app.get_batch(batch.id).await.current_quantity, 10);
    let movements = app
        .services
        .stock_movements
        .movements_for_batch(batch.id)
        .await
        .expect("list movements");
    assert_eq!(movements.len(), 1, "failed sale must not be ledgered");
}

#[tokio::test]
async fn movement_sign_rules_are_enforced() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("create batch");

    for (movement_type, delta) in [
        (StockMovementType::Restock, -5),
        (StockMovementType::Sale, 5),
        (StockMovementType::ManualOut, 5),
        (StockMovementType::Adjustment, 0),
    ] {
        let err = app
            .services
            .stock_movements
            .apply_movement(batch.id, movement_type, delta)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::ValidationError(_)),
            "{movement_type} with delta {delta} should be a validation error"
        );
    }
}

#[tokio::test]
async fn adjustments_move_stock_both_ways() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("create batch");

    let (batch, _) = app
        .services
        .stock_movements
        .adjust_stock(batch.id, -4)
        .await
        .expect("negative adjustment");
    assert_eq!(batch.current_quantity, 6);

    let (batch, _) = app
        .services
        .stock_movements
        .adjust_stock(batch.id, 2)
        .await
        .expect("positive adjustment");
    assert_eq!(batch.current_quantity, 8);

    let check = app
        .services
        .stock_movements
        .verify_ledger(batch.id)
        .await
        .expect("verify ledger");
    assert!(check.consistent);
    assert_eq!(check.movement_count, 3);
    assert_eq!(check.movement_sum, 8);
}

#[tokio::test]
async fn depleted_batches_reject_further_outbound_movements() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 5)
        .await
        .expect("create batch");

    app.services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -5)
        .await
        .expect("deplete");

    let err = app
        .services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -1)
        .await
        .unwrap_err();
    match err {
        ServiceError::InvalidStatus(msg) => {
            assert!(msg.contains("already depleted"), "got: {msg}")
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ==================== Expiration Guard Tests ====================

#[tokio::test]
async fn expired_batches_refuse_restock_and_sale() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .seed_batch(product.id, days_from_today(-10), days_from_today(-1), 5)
        .await;

    let err = app
        .services
        .batches
        .restock_batch(batch.id, 5)
        .await
        .unwrap_err();
    match err {
        ServiceError::InvalidStatus(msg) => {
            assert_eq!(msg, "Cannot restock expired batch")
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = app
        .services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -1)
        .await
        .unwrap_err();
    match err {
        ServiceError::InvalidStatus(msg) => assert!(msg.contains("is expired"), "got: {msg}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn batch_expiring_today_still_sells() {
    let app = TestApp::new().await;
    // Zero days of shelf life expires the lot at the end of its production day.
    let product = app.seed_product(1, dec!(1.25), 0).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 5)
        .await
        .expect("create batch");
    assert_eq!(batch.expiration_date, today());

    let (batch, _) = app
        .services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -2)
        .await
        .expect("sale on expiration day");
    assert_eq!(batch.current_quantity, 3);
}

// ==================== Manual Out Tests ====================

#[tokio::test]
async fn manual_out_pulls_remaining_stock_and_sticks() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 8)
        .await
        .expect("create batch");

    let batch = app
        .services
        .batches
        .mark_manual_out(batch.id)
        .await
        .expect("manual out");
    assert_eq!(batch.current_quantity, 0);
    assert_eq!(batch.status, BatchStatus::ManualOut);

    let movements = app
        .services
        .stock_movements
        .movements_for_batch(batch.id)
        .await
        .expect("list movements");
    assert_eq!(movements.last().map(|m| m.delta), Some(-8));
    assert_eq!(
        movements.last().map(|m| m.movement_type),
        Some(StockMovementType::ManualOut)
    );

    // Pulling an already empty lot is refused.
    let err = app
        .services
        .batches
        .mark_manual_out(batch.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    // Restocking puts the lot back on sale.
    let batch = app
        .services
        .batches
        .restock_batch(batch.id, 5)
        .await
        .expect("restock after manual out");
    assert_eq!(batch.current_quantity, 5);
    assert_eq!(batch.status, BatchStatus::Active);

    let check = app
        .services
        .stock_movements
        .verify_ledger(batch.id)
        .await
        .expect("verify ledger");
    assert!(check.consistent);
    assert_eq!(check.movement_sum, 5);
}

// ==================== Batch Expiry Tests ====================

#[tokio::test]
async fn expiring_a_batch_removes_stock_through_the_ledger() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .seed_batch(product.id, days_from_today(-10), days_from_today(-1), 7)
        .await;

    let outcome = app
        .services
        .batches
        .expire_batch(batch.id)
        .await
        .expect("expire batch");
    assert_eq!(outcome.removed, 7);
    assert_eq!(outcome.released_reservations, 0);

    let batch = app.get_batch(batch.id).await;
    assert_eq!(batch.current_quantity, 0);
    assert_eq!(batch.status, BatchStatus::Expired);

    let movements = app
        .services
        .stock_movements
        .movements_for_batch(batch.id)
        .await
        .expect("list movements");
    assert_eq!(
        movements.last().map(|m| m.movement_type),
        Some(StockMovementType::ExpiredRemoval)
    );
    assert_eq!(movements.last().map(|m| m.delta), Some(-7));

    let check = app
        .services
        .stock_movements
        .verify_ledger(batch.id)
        .await
        .expect("verify ledger");
    assert!(check.consistent);
    assert_eq!(check.movement_sum, 0);

    // Expiring again is a no-op, not an error.
    let outcome = app
        .services
        .batches
        .expire_batch(batch.id)
        .await
        .expect("expire again");
    assert_eq!(outcome.removed, 0);
}

#[tokio::test]
async fn batches_cannot_be_expired_early() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 5)
        .await
        .expect("create batch");

    let err = app.services.batches.expire_batch(batch.id).await.unwrap_err();
    match err {
        ServiceError::InvalidStatus(msg) => {
            assert!(msg.contains("has not reached its expiration date"), "got: {msg}")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn expiry_sweep_picks_up_every_due_lot() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let due_a = app
        .seed_batch(product.id, days_from_today(-10), days_from_today(-2), 4)
        .await;
    let due_b = app
        .seed_batch(product.id, days_from_today(-9), days_from_today(-1), 6)
        .await;
    let fresh = app
        .services
        .batches
        .create_batch(product.id, today(), 9)
        .await
        .expect("fresh batch");

    let sweep = app
        .services
        .batches
        .expire_due_batches(50)
        .await
        .expect("expiry sweep");
    assert_eq!(sweep.expired, 2);
    assert_eq!(sweep.failed, 0);

    assert_eq!(app.get_batch(due_a.id).await.status, BatchStatus::Expired);
    assert_eq!(app.get_batch(due_b.id).await.status, BatchStatus::Expired);
    assert_eq!(app.get_batch(fresh.id).await.status, BatchStatus::Active);
    assert_eq!(app.get_batch(fresh.id).await.current_quantity, 9);
}

// ==================== Deletion Tests ====================

#[tokio::test]
async fn only_finished_lots_can_be_deleted() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 5)
        .await
        .expect("create batch");

    let err = app.services.batches.delete_batch(batch.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    app.services
        .stock_movements
        .apply_movement(batch.id, StockMovementType::Sale, -5)
        .await
        .expect("deplete");
    app.services
        .batches
        .delete_batch(batch.id)
        .await
        .expect("delete depleted batch");

    let err = app.services.batches.get_batch(batch.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

// ==================== Ledger Check Tests ====================

#[tokio::test]
async fn ledger_check_flags_a_drifted_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product(1, dec!(1.25), 10).await;
    let batch = app
        .services
        .batches
        .create_batch(product.id, today(), 10)
        .await
        .expect("create batch");

    // Corrupt the stored quantity behind the ledger's back.
    let mut update: batch::ActiveModel = app.get_batch(batch.id).await.into();
    update.current_quantity = Set(7);
    update.update(app.db.as_ref()).await.expect("corrupt batch");

    let check = app
        .services
        .stock_movements
        .verify_ledger(batch.id)
        .await
        .expect("verify ledger");
    assert!(!check.consistent);
    assert_eq!(check.movement_sum, 10);
    assert_eq!(check.current_quantity, 7);
}
