//! Batch reservation service.
//!
//! Reservations are time-bounded holds tying order items to the batches that
//! back them. The free functions here run inside a caller-owned transaction,
//! so order transitions and checkout stay all-or-nothing: a hold and its
//! batch's `reserved_quantity` always move together.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::batch::{self, BatchStatus, Entity as Batch};
use crate::entities::batch_reservation::{self, Entity as BatchReservation, ReservationStatus};
use crate::entities::order;
use crate::entities::order_item;
use crate::entities::stock_movement::StockMovementType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::RESERVATIONS_EXPIRED;
use crate::services::allocation::{self, BatchSnapshot};
use crate::services::stock_movements::{apply_to_batch, load_batch_for_update};

fn reserved_after_release(batch: &batch::Model, quantity: i32) -> i32 {
    let remaining = batch.reserved_quantity - quantity;
    if remaining < 0 {
        warn!(
            batch_id = %batch.id,
            reserved = batch.reserved_quantity,
            quantity,
            "Reserved quantity underflow; clamping to zero"
        );
    }
    remaining.max(0)
}

/// Reserves stock for every item of an order, oldest expiry first.
///
/// Locks each product's sellable batches, plans the allocation against
/// `available` and writes the holds plus the matching `reserved_quantity`
/// increments. Any shortfall aborts the caller's transaction, so either
/// every item is backed by holds or none is.
pub(crate) async fn create_reservations<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    items: &[order_item::Model],
    expires_at: DateTime<Utc>,
) -> Result<Vec<batch_reservation::Model>, ServiceError> {
    let now = Utc::now();
    let today = now.date_naive();
    let mut holds = Vec::new();

    for item in items {
        let batches = Batch::find()
            .filter(batch::Column::ProductId.eq(item.product_id))
            .filter(batch::Column::Status.eq(BatchStatus::Active))
            .filter(batch::Column::ExpirationDate.gte(today))
            .order_by_asc(batch::Column::ExpirationDate)
            .order_by_asc(batch::Column::ProductionDate)
            .lock_exclusive()
            .all(conn)
            .await?;

        let snapshots: Vec<BatchSnapshot> = batches
            .iter()
            .map(|b| BatchSnapshot {
                batch_id: b.id,
                expiration_date: b.expiration_date,
                production_date: b.production_date,
                available: b.available(),
            })
            .collect();
        let plan = allocation::plan_fefo(item.quantity, &snapshots).map_err(|short| {
            ServiceError::InsufficientStock(format!(
                "Insufficient stock for product {}. Requested: {}, Available: {}",
                item.product_id, short.requested, short.available
            ))
        })?;

        let mut by_id: HashMap<Uuid, batch::Model> =
            batches.into_iter().map(|b| (b.id, b)).collect();
        for alloc in plan.allocations {
            let batch = by_id.remove(&alloc.batch_id).ok_or_else(|| {
                ServiceError::InternalError("Allocation referenced an unknown batch".to_string())
            })?;
            let new_reserved = batch.reserved_quantity + alloc.quantity;
            let mut update: batch::ActiveModel = batch.into();
            update.reserved_quantity = Set(new_reserved);
            update.updated_at = Set(now);
            update.update(conn).await?;

            let hold = batch_reservation::ActiveModel {
                id: Set(Uuid::new_v4()),
                batch_id: Set(alloc.batch_id),
                product_id: Set(item.product_id),
                order_id: Set(order.id),
                order_item_id: Set(item.id),
                kiosk_user_id: Set(order.kiosk_user_id),
                quantity: Set(alloc.quantity),
                status: Set(ReservationStatus::Active),
                expires_at: Set(expires_at),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?;
            holds.push(hold);
        }
    }
    Ok(holds)
}

/// Releases every ACTIVE hold of an order back to its batch. Holds already
/// in a terminal status are left alone, so calling this twice is safe.
pub(crate) async fn release_reservations<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<u64, ServiceError> {
    let now = Utc::now();
    let holds = BatchReservation::find()
        .filter(batch_reservation::Column::OrderId.eq(order_id))
        .filter(batch_reservation::Column::Status.eq(ReservationStatus::Active))
        .lock_exclusive()
        .all(conn)
        .await?;

    let mut released = 0u64;
    for hold in holds {
        let batch = load_batch_for_update(conn, hold.batch_id).await?;
        let new_reserved = reserved_after_release(&batch, hold.quantity);
        let mut update: batch::ActiveModel = batch.into();
        update.reserved_quantity = Set(new_reserved);
        update.updated_at = Set(now);
        update.update(conn).await?;

        let mut update: batch_reservation::ActiveModel = hold.into();
        update.status = Set(ReservationStatus::Released);
        update.updated_at = Set(now);
        update.update(conn).await?;
        released += 1;
    }
    Ok(released)
}

/// Consumes every ACTIVE hold of an order: stock leaves the batch through a
/// SALE movement and the matching hold flips to CONSUMED.
pub(crate) async fn consume_reservations<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<u64, ServiceError> {
    let now = Utc::now();
    let holds = BatchReservation::find()
        .filter(batch_reservation::Column::OrderId.eq(order_id))
        .filter(batch_reservation::Column::Status.eq(ReservationStatus::Active))
        .lock_exclusive()
        .all(conn)
        .await?;

    let mut consumed = 0u64;
    for hold in holds {
        let batch = load_batch_for_update(conn, hold.batch_id).await?;
        let new_reserved = reserved_after_release(&batch, hold.quantity);
        let mut update: batch::ActiveModel = batch.into();
        update.reserved_quantity = Set(new_reserved);
        update.updated_at = Set(now);
        let batch = update.update(conn).await?;

        apply_to_batch(conn, batch, StockMovementType::Sale, -hold.quantity, now).await?;

        let mut update: batch_reservation::ActiveModel = hold.into();
        update.status = Set(ReservationStatus::Consumed);
        update.updated_at = Set(now);
        update.update(conn).await?;
        consumed += 1;
    }
    Ok(consumed)
}

/// Pushes the expiry of every ACTIVE hold of an order to `expires_at`.
pub(crate) async fn extend_reservations<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let result = BatchReservation::update_many()
        .col_expr(batch_reservation::Column::ExpiresAt, Expr::value(expires_at))
        .col_expr(batch_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(batch_reservation::Column::OrderId.eq(order_id))
        .filter(batch_reservation::Column::Status.eq(ReservationStatus::Active))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReservationSweep {
    pub expired: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReservationService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ReservationService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<batch_reservation::Model, ServiceError> {
        BatchReservation::find_by_id(reservation_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Reservation {} not found", reservation_id))
            })
    }

    /// Every hold of an order, in creation order, whatever its status.
    #[instrument(skip(self))]
    pub async fn list_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<batch_reservation::Model>, ServiceError> {
        Ok(BatchReservation::find()
            .filter(batch_reservation::Column::OrderId.eq(order_id))
            .order_by_asc(batch_reservation::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await?)
    }

    /// Sweep: expires ACTIVE holds whose deadline has passed, up to `limit`
    /// per run. Each hold is handled in its own transaction so one failure
    /// never blocks the rest.
    #[instrument(skip(self))]
    pub async fn process_expired(&self, limit: u64) -> Result<ReservationSweep, ServiceError> {
        let now = Utc::now();
        let due = BatchReservation::find()
            .filter(batch_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(batch_reservation::Column::ExpiresAt.lte(now))
            .order_by_asc(batch_reservation::Column::ExpiresAt)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await?;

        let mut sweep = ReservationSweep::default();
        for hold in due {
            match self.expire_one(hold.id).await {
                Ok(Some(expired)) => {
                    sweep.expired += 1;
                    RESERVATIONS_EXPIRED.inc();
                    self.event_sender
                        .send(Event::ReservationExpired {
                            reservation_id: expired.id,
                            batch_id: expired.batch_id,
                            quantity: expired.quantity,
                        })
                        .await
                        .map_err(ServiceError::EventError)?;
                }
                Ok(None) => {}
                Err(e) => {
                    sweep.failed += 1;
                    warn!(reservation_id = %hold.id, error = %e, "Failed to expire reservation");
                }
            }
        }
        if sweep.expired > 0 || sweep.failed > 0 {
            info!(
                expired = sweep.expired,
                failed = sweep.failed,
                "Reservation expiry sweep finished"
            );
        }
        Ok(sweep)
    }

    /// Expires one hold if it is still ACTIVE and past its deadline. Returns
    /// `None` when another worker or an order transition got there first.
    async fn expire_one(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<batch_reservation::Model>, ServiceError> {
        self.db_pool
            .transaction::<_, Option<batch_reservation::Model>, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let hold = BatchReservation::find_by_id(reservation_id)
                        .lock_exclusive()
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Reservation {} not found",
                                reservation_id
                            ))
                        })?;
                    if hold.status != ReservationStatus::Active || hold.expires_at > now {
                        return Ok(None);
                    }

                    let batch = load_batch_for_update(txn, hold.batch_id).await?;
                    let new_reserved = reserved_after_release(&batch, hold.quantity);
                    let mut update: batch::ActiveModel = batch.into();
                    update.reserved_quantity = Set(new_reserved);
                    update.updated_at = Set(now);
                    update.update(txn).await?;

                    let mut update: batch_reservation::ActiveModel = hold.into();
                    update.status = Set(ReservationStatus::Expired);
                    update.updated_at = Set(now);
                    Ok(Some(update.update(txn).await?))
                })
            })
            .await
            .map_err(ServiceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn batch_with(reserved: i32) -> batch::Model {
        let date = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
        batch::Model {
            id: Uuid::new_v4(),
            batch_number: "LOTE-20240620-001".into(),
            product_id: Uuid::new_v4(),
            production_date: date,
            expiration_date: date,
            initial_quantity: 50,
            current_quantity: 50,
            reserved_quantity: reserved,
            status: BatchStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn releasing_subtracts_held_quantity() {
        assert_eq!(reserved_after_release(&batch_with(10), 4), 6);
    }

    #[test]
    fn releasing_never_goes_negative() {
        assert_eq!(reserved_after_release(&batch_with(2), 5), 0);
    }
}
