//! Batch (lot) lifecycle service.
//!
//! Batches carry all sellable stock. Creation writes the opening RESTOCK
//! movement in the same transaction as the row itself, so the ledger covers
//! a batch from its first unit. Expiry removes remaining stock through an
//! EXPIRED_REMOVAL movement and expires any live holds on the lot.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::batch::{self, BatchStatus, Entity as Batch};
use crate::entities::batch_reservation::{
    self, Entity as BatchReservation, ReservationStatus,
};
use crate::entities::product::Entity as Product;
use crate::entities::stock_movement::StockMovementType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{BATCHES_EXPIRED, RESERVATIONS_EXPIRED};
use crate::services::stock_movements::{apply_to_batch, load_batch_for_update};

/// Per-batch availability as exposed to storefront queries.
#[derive(Debug, Clone, Serialize)]
pub struct BatchAvailability {
    pub batch_id: Uuid,
    pub batch_number: String,
    pub expiration_date: NaiveDate,
    pub current_quantity: i32,
    pub reserved_quantity: i32,
    pub available: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductAvailability {
    pub product_id: Uuid,
    pub total_current: i32,
    pub total_reserved: i32,
    pub total_available: i32,
    pub batches: Vec<BatchAvailability>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchExpiryOutcome {
    pub batch_id: Uuid,
    pub removed: i32,
    pub released_reservations: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchExpirySweep {
    pub expired: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct BatchService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl BatchService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a dated lot for a product and records its opening stock.
    ///
    /// The lot number is `LOTE-<production date>-<NNN>`, numbered within the
    /// production day. Expiration is `production_date` plus the product's
    /// shelf life.
    #[instrument(skip(self))]
    pub async fn create_batch(
        &self,
        product_id: Uuid,
        production_date: NaiveDate,
        initial_quantity: i32,
    ) -> Result<batch::Model, ServiceError> {
        if initial_quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Initial quantity must be positive".to_string(),
            ));
        }

        let product = Product::find_by_id(product_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        if !product.active {
            return Err(ServiceError::ValidationError(format!(
                "Product {} is not active",
                product_id
            )));
        }

        let expiration_date = production_date + Duration::days(i64::from(product.duration_days));
        let today = Utc::now().date_naive();
        if expiration_date < today {
            return Err(ServiceError::ValidationError(format!(
                "Computed expiration date {} is already in the past",
                expiration_date
            )));
        }

        let batch = self
            .db_pool
            .transaction::<_, batch::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let prefix = format!("LOTE-{}-", production_date.format("%Y%m%d"));
                    let lots_today = Batch::find()
                        .filter(batch::Column::BatchNumber.starts_with(&prefix))
                        .count(txn)
                        .await?;
                    let batch_number = format!("{}{:03}", prefix, lots_today + 1);

                    let batch = batch::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        batch_number: Set(batch_number),
                        product_id: Set(product.id),
                        production_date: Set(production_date),
                        expiration_date: Set(expiration_date),
                        initial_quantity: Set(initial_quantity),
                        current_quantity: Set(0),
                        reserved_quantity: Set(0),
                        status: Set(BatchStatus::Active),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let (batch, _) =
                        apply_to_batch(txn, batch, StockMovementType::Restock, initial_quantity, now)
                            .await?;
                    Ok(batch)
                })
            })
            .await?;

        info!(
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            product_id = %product_id,
            initial_quantity,
            expiration_date = %expiration_date,
            "Created batch"
        );
        self.event_sender
            .send(Event::BatchCreated {
                batch_id: batch.id,
                product_id,
                quantity: initial_quantity,
                expiration_date,
            })
            .await
            .map_err(ServiceError::EventError)?;
        Ok(batch)
    }

    /// Adds stock to an existing lot. Rejected once the lot is past its
    /// expiration date.
    #[instrument(skip(self))]
    pub async fn restock_batch(
        &self,
        batch_id: Uuid,
        quantity: i32,
    ) -> Result<batch::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Restock quantity must be positive".to_string(),
            ));
        }

        let batch = self
            .db_pool
            .transaction::<_, batch::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let batch = load_batch_for_update(txn, batch_id).await?;
                    let (batch, _) =
                        apply_to_batch(txn, batch, StockMovementType::Restock, quantity, Utc::now())
                            .await?;
                    Ok(batch)
                })
            })
            .await?;

        info!(
            batch_id = %batch_id,
            quantity,
            new_quantity = batch.current_quantity,
            "Restocked batch"
        );
        self.event_sender
            .send(Event::BatchRestocked { batch_id, quantity })
            .await
            .map_err(ServiceError::EventError)?;
        Ok(batch)
    }

    /// Vendor pulls the remaining stock of a lot from sale. The lot keeps
    /// MANUAL_OUT status until restocked.
    #[instrument(skip(self))]
    pub async fn mark_manual_out(&self, batch_id: Uuid) -> Result<batch::Model, ServiceError> {
        let (batch, removed) = self
            .db_pool
            .transaction::<_, (batch::Model, i32), ServiceError>(move |txn| {
                Box::pin(async move {
                    let batch = load_batch_for_update(txn, batch_id).await?;
                    if batch.current_quantity <= 0 {
                        return Err(ServiceError::InvalidStatus(
                            "Batch is already depleted".to_string(),
                        ));
                    }
                    if batch.reserved_quantity > 0 {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Batch {} has {} reserved units; wait for the holds to clear",
                            batch.batch_number, batch.reserved_quantity
                        )));
                    }
                    let removed = batch.current_quantity;
                    let (batch, _) =
                        apply_to_batch(txn, batch, StockMovementType::ManualOut, -removed, Utc::now())
                            .await?;
                    Ok((batch, removed))
                })
            })
            .await?;

        info!(batch_id = %batch_id, removed, "Marked batch out of stock");
        self.event_sender
            .send(Event::BatchMarkedOut { batch_id, removed })
            .await
            .map_err(ServiceError::EventError)?;
        Ok(batch)
    }

    /// Expires a lot that is past its expiration date: remaining stock is
    /// removed through the ledger and live holds on the lot are expired.
    /// Calling it on an already-expired, empty lot is a no-op.
    #[instrument(skip(self))]
    pub async fn expire_batch(&self, batch_id: Uuid) -> Result<BatchExpiryOutcome, ServiceError> {
        let (outcome, newly_expired) = self
            .db_pool
            .transaction::<_, (BatchExpiryOutcome, bool), ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let today = now.date_naive();
                    let batch = load_batch_for_update(txn, batch_id).await?;

                    if !batch.is_date_expired(today) {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Batch {} has not reached its expiration date",
                            batch.batch_number
                        )));
                    }
                    if batch.status == BatchStatus::Expired && batch.current_quantity == 0 {
                        let outcome = BatchExpiryOutcome {
                            batch_id,
                            removed: 0,
                            released_reservations: 0,
                        };
                        return Ok((outcome, false));
                    }

                    let holds = BatchReservation::find()
                        .filter(batch_reservation::Column::BatchId.eq(batch_id))
                        .filter(batch_reservation::Column::Status.eq(ReservationStatus::Active))
                        .lock_exclusive()
                        .all(txn)
                        .await?;
                    let released_reservations = holds.len() as u64;
                    for hold in holds {
                        let mut update: batch_reservation::ActiveModel = hold.into();
                        update.status = Set(ReservationStatus::Expired);
                        update.updated_at = Set(now);
                        update.update(txn).await?;
                    }

                    let mut update: batch::ActiveModel = batch.into();
                    update.reserved_quantity = Set(0);
                    update.updated_at = Set(now);
                    let batch = update.update(txn).await?;

                    let removed = batch.current_quantity;
                    if removed > 0 {
                        apply_to_batch(txn, batch, StockMovementType::ExpiredRemoval, -removed, now)
                            .await?;
                    } else if batch.status != BatchStatus::Expired {
                        let mut update: batch::ActiveModel = batch.into();
                        update.status = Set(BatchStatus::Expired);
                        update.updated_at = Set(now);
                        update.update(txn).await?;
                    }

                    let outcome = BatchExpiryOutcome {
                        batch_id,
                        removed,
                        released_reservations,
                    };
                    Ok((outcome, true))
                })
            })
            .await?;

        if newly_expired {
            BATCHES_EXPIRED.inc();
            RESERVATIONS_EXPIRED.inc_by(outcome.released_reservations);
            info!(
                batch_id = %batch_id,
                removed = outcome.removed,
                released_reservations = outcome.released_reservations,
                "Expired batch"
            );
            self.event_sender
                .send(Event::BatchExpired {
                    batch_id,
                    removed: outcome.removed,
                    released_reservations: outcome.released_reservations,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(outcome)
    }

    /// Soft-deletes a lot. Only depleted or expired lots can go.
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, batch_id: Uuid) -> Result<(), ServiceError> {
        self.db_pool
            .transaction::<_, (), ServiceError>(move |txn| {
                Box::pin(async move {
                    let batch = load_batch_for_update(txn, batch_id).await?;
                    if !batch.status.can_delete() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Cannot delete batch {} in status {}",
                            batch.batch_number, batch.status
                        )));
                    }
                    let mut update: batch::ActiveModel = batch.into();
                    update.status = Set(BatchStatus::Deleted);
                    update.updated_at = Set(Utc::now());
                    update.update(txn).await?;
                    Ok(())
                })
            })
            .await?;

        info!(batch_id = %batch_id, "Deleted batch");
        self.event_sender
            .send(Event::BatchDeleted(batch_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_batch(&self, batch_id: Uuid) -> Result<batch::Model, ServiceError> {
        Batch::find_by_id(batch_id)
            .filter(batch::Column::Status.ne(BatchStatus::Deleted))
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))
    }

    /// All non-deleted lots of a product, oldest expiry first.
    #[instrument(skip(self))]
    pub async fn list_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        Ok(Batch::find()
            .filter(batch::Column::ProductId.eq(product_id))
            .filter(batch::Column::Status.ne(BatchStatus::Deleted))
            .order_by_asc(batch::Column::ExpirationDate)
            .order_by_asc(batch::Column::ProductionDate)
            .all(self.db_pool.as_ref())
            .await?)
    }

    /// Sellable stock of a product, broken down by lot in selling order.
    #[instrument(skip(self))]
    pub async fn product_availability(
        &self,
        product_id: Uuid,
    ) -> Result<ProductAvailability, ServiceError> {
        Product::find_by_id(product_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let today = Utc::now().date_naive();
        let batches = Batch::find()
            .filter(batch::Column::ProductId.eq(product_id))
            .filter(batch::Column::Status.eq(BatchStatus::Active))
            .filter(batch::Column::ExpirationDate.gte(today))
            .order_by_asc(batch::Column::ExpirationDate)
            .order_by_asc(batch::Column::ProductionDate)
            .all(self.db_pool.as_ref())
            .await?;

        let mut availability = ProductAvailability {
            product_id,
            total_current: 0,
            total_reserved: 0,
            total_available: 0,
            batches: Vec::with_capacity(batches.len()),
        };
        for batch in batches {
            availability.total_current += batch.current_quantity;
            availability.total_reserved += batch.reserved_quantity;
            availability.total_available += batch.available();
            availability.batches.push(BatchAvailability {
                batch_id: batch.id,
                batch_number: batch.batch_number,
                expiration_date: batch.expiration_date,
                current_quantity: batch.current_quantity,
                reserved_quantity: batch.reserved_quantity,
                available: batch.current_quantity - batch.reserved_quantity,
            });
        }
        Ok(availability)
    }

    /// Daily sweep: expires every lot past its expiration date, up to `limit`
    /// per run. A failing lot is logged and skipped; the sweep moves on.
    #[instrument(skip(self))]
    pub async fn expire_due_batches(&self, limit: u64) -> Result<BatchExpirySweep, ServiceError> {
        let today = Utc::now().date_naive();
        let due = Batch::find()
            .filter(batch::Column::Status.is_in([
                BatchStatus::Active,
                BatchStatus::Depleted,
                BatchStatus::ManualOut,
            ]))
            .filter(batch::Column::ExpirationDate.lt(today))
            .order_by_asc(batch::Column::ExpirationDate)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await?;

        let mut sweep = BatchExpirySweep::default();
        for batch in due {
            match self.expire_batch(batch.id).await {
                Ok(_) => sweep.expired += 1,
                Err(e) => {
                    sweep.failed += 1;
                    warn!(batch_id = %batch.id, error = %e, "Failed to expire batch");
                }
            }
        }
        if sweep.expired > 0 || sweep.failed > 0 {
            info!(expired = sweep.expired, failed = sweep.failed, "Batch expiry sweep finished");
        }
        Ok(sweep)
    }
}
