//! Stock ledger service.
//!
//! Every change to a batch's `current_quantity` flows through
//! [`apply_to_batch`]: the movement row and the batch update are written in
//! the same transaction, so for any batch the sum of movement deltas always
//! equals its current quantity. Reservation holds are not ledgered; the
//! ledger tracks physical stock only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::batch::{self, BatchStatus, Entity as Batch};
use crate::entities::stock_movement::{self, Entity as StockMovement, StockMovementType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::STOCK_MOVEMENTS_RECORDED;
use crate::services::allocation::{self, BatchSnapshot};

/// Outcome of replaying a batch's ledger against its stored quantity.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerCheck {
    pub batch_id: Uuid,
    pub movement_count: u64,
    pub movement_sum: i64,
    pub current_quantity: i32,
    pub consistent: bool,
}

/// Loads a batch row under an exclusive lock, skipping soft-deleted lots.
pub(crate) async fn load_batch_for_update<C: ConnectionTrait>(
    conn: &C,
    batch_id: Uuid,
) -> Result<batch::Model, ServiceError> {
    Batch::find_by_id(batch_id)
        .filter(batch::Column::Status.ne(BatchStatus::Deleted))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))
}

fn validate_delta(movement_type: StockMovementType, delta: i32) -> Result<(), ServiceError> {
    if delta == 0 {
        return Err(ServiceError::ValidationError(
            "Movement delta must be nonzero".to_string(),
        ));
    }
    let sign_ok = match movement_type {
        StockMovementType::Restock => delta > 0,
        StockMovementType::Sale | StockMovementType::ManualOut | StockMovementType::ExpiredRemoval => {
            delta < 0
        }
        StockMovementType::Adjustment => true,
    };
    if !sign_ok {
        return Err(ServiceError::ValidationError(format!(
            "{} movements must carry a {} delta, got {}",
            movement_type,
            if delta > 0 { "negative" } else { "positive" },
            delta
        )));
    }
    Ok(())
}

/// Applies one signed movement to an already-locked batch.
///
/// Validates the movement against the batch's state, appends the ledger row,
/// updates `current_quantity` and recomputes the derived status. The caller
/// owns the surrounding transaction and row lock.
pub(crate) async fn apply_to_batch<C: ConnectionTrait>(
    conn: &C,
    batch: batch::Model,
    movement_type: StockMovementType,
    delta: i32,
    now: DateTime<Utc>,
) -> Result<(batch::Model, stock_movement::Model), ServiceError> {
    validate_delta(movement_type, delta)?;

    let today = now.date_naive();
    if batch.is_date_expired(today) && movement_type != StockMovementType::ExpiredRemoval {
        let message = if movement_type == StockMovementType::Restock {
            "Cannot restock expired batch".to_string()
        } else {
            format!("Batch {} is expired", batch.batch_number)
        };
        return Err(ServiceError::InvalidStatus(message));
    }
    if delta < 0 && batch.current_quantity <= 0 {
        return Err(ServiceError::InvalidStatus(
            "Batch is already depleted".to_string(),
        ));
    }

    let new_quantity = batch.current_quantity + delta;
    if new_quantity < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Insufficient stock in batch {}. Requested: {}, Available: {}",
            batch.batch_number, -delta, batch.current_quantity
        )));
    }

    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        batch_id: Set(batch.id),
        movement_type: Set(movement_type),
        delta: Set(delta),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    // MANUAL_OUT is an explicit vendor action, not an ordinary depletion.
    let new_status = if movement_type == StockMovementType::ManualOut {
        BatchStatus::ManualOut
    } else {
        batch::derive_status(batch.status, new_quantity, batch.expiration_date, today)
    };

    let mut update: batch::ActiveModel = batch.into();
    update.current_quantity = Set(new_quantity);
    update.status = Set(new_status);
    update.updated_at = Set(now);
    let batch = update.update(conn).await?;

    STOCK_MOVEMENTS_RECORDED.inc();
    Ok((batch, movement))
}

#[derive(Clone)]
pub struct StockMovementService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl StockMovementService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Records a single manual movement against a batch.
    #[instrument(skip(self))]
    pub async fn apply_movement(
        &self,
        batch_id: Uuid,
        movement_type: StockMovementType,
        delta: i32,
    ) -> Result<(batch::Model, stock_movement::Model), ServiceError> {
        let (batch, movement) = self
            .db_pool
            .transaction::<_, (batch::Model, stock_movement::Model), ServiceError>(move |txn| {
                Box::pin(async move {
                    let batch = load_batch_for_update(txn, batch_id).await?;
                    apply_to_batch(txn, batch, movement_type, delta, Utc::now()).await
                })
            })
            .await?;

        info!(
            batch_id = %batch_id,
            movement_type = %movement_type,
            delta,
            new_quantity = batch.current_quantity,
            "Recorded stock movement"
        );

        let event = match movement_type {
            StockMovementType::Restock => Some(Event::BatchRestocked {
                batch_id,
                quantity: delta,
            }),
            StockMovementType::Adjustment => Some(Event::BatchAdjusted {
                batch_id,
                delta,
                new_quantity: batch.current_quantity,
            }),
            StockMovementType::ManualOut => Some(Event::BatchMarkedOut {
                batch_id,
                removed: -delta,
            }),
            StockMovementType::Sale | StockMovementType::ExpiredRemoval => None,
        };
        if let Some(event) = event {
            self.event_sender
                .send(event)
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok((batch, movement))
    }

    /// Manual stock correction, positive or negative.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        batch_id: Uuid,
        delta: i32,
    ) -> Result<(batch::Model, stock_movement::Model), ServiceError> {
        self.apply_movement(batch_id, StockMovementType::Adjustment, delta)
            .await
    }

    /// Direct sale without a reservation. Consumes oldest-expiry-first across
    /// the product's sellable batches, one SALE movement per batch drawn from.
    #[instrument(skip(self))]
    pub async fn consume_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<(batch::Model, stock_movement::Model)>, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity to consume must be positive".to_string(),
            ));
        }

        let results = self
            .db_pool
            .transaction::<_, Vec<(batch::Model, stock_movement::Model)>, ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let now = Utc::now();
                        let today = now.date_naive();
                        let batches = Batch::find()
                            .filter(batch::Column::ProductId.eq(product_id))
                            .filter(batch::Column::Status.eq(BatchStatus::Active))
                            .filter(batch::Column::ExpirationDate.gte(today))
                            .order_by_asc(batch::Column::ExpirationDate)
                            .order_by_asc(batch::Column::ProductionDate)
                            .lock_exclusive()
                            .all(txn)
                            .await?;

                        let snapshots: Vec<BatchSnapshot> = batches
                            .iter()
                            .map(|b| BatchSnapshot {
                                batch_id: b.id,
                                expiration_date: b.expiration_date,
                                production_date: b.production_date,
                                available: b.current_quantity,
                            })
                            .collect();
                        let plan = allocation::plan_fefo(quantity, &snapshots).map_err(|short| {
                            ServiceError::InsufficientStock(format!(
                                "Insufficient stock for product {}. Requested: {}, Available: {}",
                                product_id, short.requested, short.available
                            ))
                        })?;

                        let mut by_id: HashMap<Uuid, batch::Model> =
                            batches.into_iter().map(|b| (b.id, b)).collect();
                        let mut results = Vec::with_capacity(plan.allocations.len());
                        for alloc in plan.allocations {
                            let batch = by_id.remove(&alloc.batch_id).ok_or_else(|| {
                                ServiceError::InternalError(
                                    "Allocation referenced an unknown batch".to_string(),
                                )
                            })?;
                            let applied = apply_to_batch(
                                txn,
                                batch,
                                StockMovementType::Sale,
                                -alloc.quantity,
                                now,
                            )
                            .await?;
                            results.push(applied);
                        }
                        Ok(results)
                    })
                },
            )
            .await?;

        info!(
            product_id = %product_id,
            quantity,
            batches = results.len(),
            "Consumed stock across batches"
        );
        Ok(results)
    }

    /// Ledger rows for a batch, oldest first.
    #[instrument(skip(self))]
    pub async fn movements_for_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        Batch::find_by_id(batch_id)
            .filter(batch::Column::Status.ne(BatchStatus::Deleted))
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        Ok(StockMovement::find()
            .filter(stock_movement::Column::BatchId.eq(batch_id))
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await?)
    }

    /// Replays a batch's ledger and compares the sum with the stored quantity.
    #[instrument(skip(self))]
    pub async fn verify_ledger(&self, batch_id: Uuid) -> Result<LedgerCheck, ServiceError> {
        let batch = Batch::find_by_id(batch_id)
            .filter(batch::Column::Status.ne(BatchStatus::Deleted))
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        let movements = StockMovement::find()
            .filter(stock_movement::Column::BatchId.eq(batch_id))
            .all(self.db_pool.as_ref())
            .await?;
        let movement_sum: i64 = movements.iter().map(|m| i64::from(m.delta)).sum();

        Ok(LedgerCheck {
            batch_id,
            movement_count: movements.len() as u64,
            movement_sum,
            current_quantity: batch.current_quantity,
            consistent: movement_sum == i64::from(batch.current_quantity),
        })
    }
}
