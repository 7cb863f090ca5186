//! Per-vendor order service.
//!
//! Orders are created by checkout only; this service owns every later status
//! transition. Each transition runs in one transaction together with its
//! reservation effect, so an order's status and the holds backing it never
//! drift apart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{ORDERS_AUTO_REJECTED, ORDERS_PAYMENT_TIMED_OUT};
use crate::services::reservations::{
    consume_reservations, extend_reservations, release_reservations,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub checkout_session_id: Uuid,
    pub user_id: Uuid,
    pub kiosk_user_id: i64,
    pub status: String,
    pub subtotal_products: Decimal,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderResponse {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            checkout_session_id: order.checkout_session_id,
            user_id: order.user_id,
            kiosk_user_id: order.kiosk_user_id,
            status: order.status.as_str().to_string(),
            subtotal_products: order.subtotal_products,
            accepted_at: order.accepted_at,
            rejected_at: order.rejected_at,
            paid_at: order.paid_at,
            expires_at: order.expires_at,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OrderSweep {
    pub processed: usize,
    pub failed: usize,
}

pub(crate) async fn load_order_for_update<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    Order::find_by_id(order_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Marks one order paid inside a caller-owned transaction: consumes its
/// ACTIVE holds and stamps the payment. Used per order by checkout when a
/// session's payment settles.
pub(crate) async fn mark_order_paid<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    payment_info: Option<serde_json::Value>,
) -> Result<(order::Model, u64), ServiceError> {
    let order = load_order_for_update(conn, order_id).await?;
    if !order.status.can_mark_paid() {
        return Err(ServiceError::InvalidStatus(format!(
            "Order {} cannot be marked paid from status {}",
            order.id, order.status
        )));
    }

    let consumed = consume_reservations(conn, order_id).await?;
    let now = Utc::now();
    let mut update: order::ActiveModel = order.into();
    update.status = Set(OrderStatus::Paid);
    update.paid_at = Set(Some(now));
    if let Some(info) = payment_info {
        update.payment_info = Set(Some(info));
    }
    update.updated_at = Set(now);
    Ok((update.update(conn).await?, consumed))
}

/// Cancels one order inside a caller-owned transaction if it has not been
/// paid yet, releasing its holds. Orders already terminal or paid are left
/// alone and reported as `None`.
pub(crate) async fn cancel_order_pre_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<(order::Model, u64)>, ServiceError> {
    let order = load_order_for_update(conn, order_id).await?;
    if !order.status.can_cancel_before_payment() {
        return Ok(None);
    }

    let released = release_reservations(conn, order_id).await?;
    let mut update: order::ActiveModel = order.into();
    update.status = Set(OrderStatus::Cancelled);
    update.updated_at = Set(Utc::now());
    Ok(Some((update.update(conn).await?, released)))
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    /// How long a customer has to pay once the kiosk accepts.
    payment_window: chrono::Duration,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        payment_window: chrono::Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            payment_window,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await?;
        Ok(OrderDetails {
            order: order.into(),
            items: items.into_iter().map(Into::into).collect(),
        })
    }

    /// Orders addressed to one kiosk, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_kiosk(
        &self,
        kiosk_user_id: i64,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = Order::find().filter(order::Column::KioskUserId.eq(kiosk_user_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        self.paginate(query, page, per_page).await
    }

    /// Orders placed by one customer, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = Order::find().filter(order::Column::UserId.eq(user_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        self.paginate(query, page, per_page).await
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<Order>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db_pool.as_ref(), per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        Ok(OrderListResponse {
            orders: orders.into_iter().map(Into::into).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Kiosk accepts a pending order. The payment clock starts now: both the
    /// order and its holds get `now + payment_window` as their new deadline.
    #[instrument(skip(self))]
    pub async fn accept_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let payment_window = self.payment_window;
        let order = self
            .db_pool
            .transaction::<_, order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_update(txn, order_id).await?;
                    if !order.status.is_pending() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} cannot be accepted from status {}",
                            order.id, order.status
                        )));
                    }

                    let now = Utc::now();
                    let expires_at = now + payment_window;
                    extend_reservations(txn, order_id, expires_at).await?;

                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::Accepted);
                    update.accepted_at = Set(Some(now));
                    update.expires_at = Set(Some(expires_at));
                    update.updated_at = Set(now);
                    Ok(update.update(txn).await?)
                })
            })
            .await?;

        info!(order_id = %order_id, expires_at = ?order.expires_at, "Order accepted by kiosk");
        self.event_sender
            .send(Event::OrderAccepted(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(order.into())
    }

    /// Kiosk rejects a pending order; its holds return to the shelves.
    #[instrument(skip(self))]
    pub async fn reject_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let (order, released) = self
            .db_pool
            .transaction::<_, (order::Model, u64), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_update(txn, order_id).await?;
                    if !order.status.is_pending() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} cannot be rejected from status {}",
                            order.id, order.status
                        )));
                    }

                    let released = release_reservations(txn, order_id).await?;
                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::Rejected);
                    update.rejected_at = Set(Some(Utc::now()));
                    update.updated_at = Set(Utc::now());
                    Ok((update.update(txn).await?, released))
                })
            })
            .await?;

        info!(order_id = %order_id, released, "Order rejected by kiosk");
        self.event_sender
            .send(Event::OrderRejected(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        if released > 0 {
            self.event_sender
                .send(Event::ReservationsReleased { order_id, count: released })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(order.into())
    }

    /// Freezes the order for payment with an explicit deadline. Status and
    /// deadline only; holds are untouched.
    #[instrument(skip(self))]
    pub async fn mark_ready_for_payment(
        &self,
        order_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .db_pool
            .transaction::<_, order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_update(txn, order_id).await?;
                    if !order.status.can_mark_ready_for_payment() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} cannot be marked ready for payment from status {}",
                            order.id, order.status
                        )));
                    }

                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::ReadyForPayment);
                    update.expires_at = Set(Some(expires_at));
                    update.updated_at = Set(Utc::now());
                    Ok(update.update(txn).await?)
                })
            })
            .await?;

        info!(order_id = %order_id, expires_at = %expires_at, "Order ready for payment");
        self.event_sender
            .send(Event::OrderReadyForPayment(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(order.into())
    }

    /// Marks a single order paid outside of a checkout session settlement.
    #[instrument(skip(self, payment_info))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_info: Option<serde_json::Value>,
    ) -> Result<OrderResponse, ServiceError> {
        let (order, consumed) = self
            .db_pool
            .transaction::<_, (order::Model, u64), ServiceError>(move |txn| {
                Box::pin(async move { mark_order_paid(txn, order_id, payment_info).await })
            })
            .await?;

        info!(order_id = %order_id, consumed, "Order paid");
        self.event_sender
            .send(Event::OrderPaid(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        if consumed > 0 {
            self.event_sender
                .send(Event::ReservationsConsumed { order_id, count: consumed })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(order.into())
    }

    /// Customer cancels before paying; holds return to the shelves.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let (order, released) = self
            .db_pool
            .transaction::<_, (order::Model, u64), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_update(txn, order_id).await?;
                    if !order.status.can_cancel_before_payment() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} cannot be cancelled from status {}",
                            order.id, order.status
                        )));
                    }

                    let released = release_reservations(txn, order_id).await?;
                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::Cancelled);
                    update.updated_at = Set(Utc::now());
                    Ok((update.update(txn).await?, released))
                })
            })
            .await?;

        info!(order_id = %order_id, released, "Order cancelled");
        self.event_sender
            .send(Event::OrderCancelled(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        if released > 0 {
            self.event_sender
                .send(Event::ReservationsReleased { order_id, count: released })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(order.into())
    }

    /// Customer asks to cancel an already-paid order. Stock moved at payment
    /// time, so nothing changes on the shelves until the kiosk decides.
    #[instrument(skip(self))]
    pub async fn request_cancellation(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self
            .db_pool
            .transaction::<_, order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_update(txn, order_id).await?;
                    if order.status != OrderStatus::Paid {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Cancellation can only be requested for paid orders; order {} is {}",
                            order.id, order.status
                        )));
                    }

                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::CancelRequested);
                    update.updated_at = Set(Utc::now());
                    Ok(update.update(txn).await?)
                })
            })
            .await?;

        info!(order_id = %order_id, "Order cancellation requested");
        self.event_sender
            .send(Event::OrderCancelRequested(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(order.into())
    }

    /// Kiosk approves a requested cancellation. Any hold that somehow stayed
    /// ACTIVE is released on the way out.
    #[instrument(skip(self))]
    pub async fn finalize_cancellation(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let (order, released) = self
            .db_pool
            .transaction::<_, (order::Model, u64), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_order_for_update(txn, order_id).await?;
                    if order.status != OrderStatus::CancelRequested {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} has no pending cancellation request (status {})",
                            order.id, order.status
                        )));
                    }

                    let released = release_reservations(txn, order_id).await?;
                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::Cancelled);
                    update.updated_at = Set(Utc::now());
                    Ok((update.update(txn).await?, released))
                })
            })
            .await?;

        info!(order_id = %order_id, released, "Order cancellation finalized");
        self.event_sender
            .send(Event::OrderCancelled(order_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(order.into())
    }

    /// Sweep: rejects pending orders whose kiosk response window elapsed and
    /// releases their holds. An order that left PENDING_KIOSK_CONFIRMATION
    /// between the scan and the write is skipped silently.
    #[instrument(skip(self))]
    pub async fn auto_reject_timed_out(&self, limit: u64) -> Result<OrderSweep, ServiceError> {
        let now = Utc::now();
        let due = Order::find()
            .filter(order::Column::Status.eq(OrderStatus::PendingKioskConfirmation))
            .filter(order::Column::ExpiresAt.lte(now))
            .order_by_asc(order::Column::ExpiresAt)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await?;

        let mut sweep = OrderSweep::default();
        for order in due {
            match self.auto_reject_one(order.id).await {
                Ok(Some(released)) => {
                    sweep.processed += 1;
                    ORDERS_AUTO_REJECTED.inc();
                    info!(order_id = %order.id, released, "Order auto-rejected on timeout");
                    self.event_sender
                        .send(Event::OrderAutoRejected(order.id))
                        .await
                        .map_err(ServiceError::EventError)?;
                }
                Ok(None) => {}
                Err(e) => {
                    sweep.failed += 1;
                    warn!(order_id = %order.id, error = %e, "Failed to auto-reject order");
                }
            }
        }
        Ok(sweep)
    }

    async fn auto_reject_one(&self, order_id: Uuid) -> Result<Option<u64>, ServiceError> {
        self.db_pool
            .transaction::<_, Option<u64>, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let order = load_order_for_update(txn, order_id).await?;
                    if !order.status.is_pending() {
                        return Ok(None);
                    }
                    match order.expires_at {
                        Some(deadline) if deadline <= now => {}
                        _ => return Ok(None),
                    }

                    let released = release_reservations(txn, order_id).await?;
                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::AutoRejectedTimeout);
                    update.rejected_at = Set(Some(now));
                    update.updated_at = Set(now);
                    update.update(txn).await?;
                    Ok(Some(released))
                })
            })
            .await
            .map_err(ServiceError::from)
    }

    /// Sweep: cancels accepted orders whose payment window elapsed without a
    /// successful payment, releasing their holds.
    #[instrument(skip(self))]
    pub async fn cancel_payment_overdue(&self, limit: u64) -> Result<OrderSweep, ServiceError> {
        let now = Utc::now();
        let due = Order::find()
            .filter(order::Column::Status.is_in([
                OrderStatus::Accepted,
                OrderStatus::ReadyForPayment,
            ]))
            .filter(order::Column::ExpiresAt.lte(now))
            .order_by_asc(order::Column::ExpiresAt)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await?;

        let mut sweep = OrderSweep::default();
        for order in due {
            match self.cancel_overdue_one(order.id).await {
                Ok(Some(released)) => {
                    sweep.processed += 1;
                    ORDERS_PAYMENT_TIMED_OUT.inc();
                    info!(order_id = %order.id, released, "Order cancelled on payment timeout");
                    self.event_sender
                        .send(Event::OrderPaymentTimedOut(order.id))
                        .await
                        .map_err(ServiceError::EventError)?;
                }
                Ok(None) => {}
                Err(e) => {
                    sweep.failed += 1;
                    warn!(order_id = %order.id, error = %e, "Failed to cancel overdue order");
                }
            }
        }
        Ok(sweep)
    }

    async fn cancel_overdue_one(&self, order_id: Uuid) -> Result<Option<u64>, ServiceError> {
        self.db_pool
            .transaction::<_, Option<u64>, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let order = load_order_for_update(txn, order_id).await?;
                    let awaiting_payment = matches!(
                        order.status,
                        OrderStatus::Accepted | OrderStatus::ReadyForPayment
                    );
                    if !awaiting_payment {
                        return Ok(None);
                    }
                    match order.expires_at {
                        Some(deadline) if deadline <= now => {}
                        _ => return Ok(None),
                    }

                    let released = release_reservations(txn, order_id).await?;
                    let mut update: order::ActiveModel = order.into();
                    update.status = Set(OrderStatus::Cancelled);
                    update.updated_at = Set(now);
                    update.update(txn).await?;
                    Ok(Some(released))
                })
            })
            .await
            .map_err(ServiceError::from)
    }
}
