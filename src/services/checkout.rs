//! Checkout session service.
//!
//! One cart becomes one session plus one PENDING order per vendor, with
//! stock held for every line, inside a single transaction. A shortfall on
//! any line rolls the whole session back; a buyer never ends up with half a
//! purchase. Payment settles the session the same way: all orders or none.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::batch_reservation;
use crate::entities::cart::{self, CartStatus, Entity as Cart};
use crate::entities::cart_item::{self, Entity as CartItem};
use crate::entities::checkout_session::{self, CheckoutSessionStatus, Entity as CheckoutSession};
use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::entities::product::{self, Entity as Product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{
    CHECKOUTS_COMPLETED, CHECKOUT_FAILURES, ORDERS_CREATED, RESERVATIONS_CREATED,
};
use crate::services::orders::{cancel_order_pre_payment, mark_order_paid, OrderDetails};
use crate::services::reservations::create_reservations;

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSessionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub status: String,
    pub total_products: Decimal,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<checkout_session::Model> for CheckoutSessionResponse {
    fn from(session: checkout_session::Model) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            cart_id: session.cart_id,
            status: session.status.as_str().to_string(),
            total_products: session.total_products,
            expires_at: session.expires_at,
            paid_at: session.paid_at,
            cancelled_at: session.cancelled_at,
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionDetails {
    #[serde(flatten)]
    pub session: CheckoutSessionResponse,
    pub orders: Vec<OrderDetails>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionSweep {
    pub expired: usize,
    pub failed: usize,
}

async fn load_session_for_update<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<checkout_session::Model, ServiceError> {
    CheckoutSession::find_by_id(session_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Checkout session {} not found", session_id))
        })
}

async fn orders_of_session<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<Vec<order::Model>, ServiceError> {
    Ok(Order::find()
        .filter(order::Column::CheckoutSessionId.eq(session_id))
        .order_by_asc(order::Column::CreatedAt)
        .lock_exclusive()
        .all(conn)
        .await?)
}

#[derive(Clone)]
pub struct CheckoutService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    /// How long the initial holds and the session itself live.
    session_window: chrono::Duration,
    /// How long a kiosk has to accept or reject its order.
    kiosk_response_window: chrono::Duration,
    /// How long the buyer has to pay once payment starts.
    payment_window: chrono::Duration,
}

impl CheckoutService {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        session_window: chrono::Duration,
        kiosk_response_window: chrono::Duration,
        payment_window: chrono::Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            session_window,
            kiosk_response_window,
            payment_window,
        }
    }

    /// Turns an active cart into a checkout session with one PENDING order
    /// per vendor and stock held for every line. All-or-nothing: any failed
    /// line rolls back the entire session.
    #[instrument(skip(self))]
    pub async fn create_from_cart(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
    ) -> Result<CheckoutSessionDetails, ServiceError> {
        match self.create_from_cart_inner(user_id, cart_id).await {
            Ok(details) => Ok(details),
            Err(e) => {
                CHECKOUT_FAILURES.inc();
                Err(e)
            }
        }
    }

    async fn create_from_cart_inner(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
    ) -> Result<CheckoutSessionDetails, ServiceError> {
        let session_window = self.session_window;
        let kiosk_response_window = self.kiosk_response_window;

        type CheckoutCreated = (
            checkout_session::Model,
            Vec<(order::Model, Vec<order_item::Model>)>,
            Vec<batch_reservation::Model>,
        );
        let (session, orders, holds) = self
            .db_pool
            .transaction::<_, CheckoutCreated, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();

                    let cart = Cart::find_by_id(cart_id)
                        .lock_exclusive()
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Cart {} not found", cart_id))
                        })?;
                    if cart.user_id != user_id {
                        return Err(ServiceError::ValidationError(
                            "Cart does not belong to user".to_string(),
                        ));
                    }
                    if cart.status != CartStatus::Active {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Cart {} is not active (status {})",
                            cart.id, cart.status
                        )));
                    }
                    let cart_items = CartItem::find()
                        .filter(cart_item::Column::CartId.eq(cart_id))
                        .order_by_asc(cart_item::Column::CreatedAt)
                        .all(txn)
                        .await?;
                    if cart_items.is_empty() {
                        return Err(ServiceError::ValidationError("Cart is empty".to_string()));
                    }

                    let product_ids: Vec<Uuid> =
                        cart_items.iter().map(|item| item.product_id).collect();
                    let products: HashMap<Uuid, product::Model> = Product::find()
                        .filter(product::Column::Id.is_in(product_ids))
                        .all(txn)
                        .await?
                        .into_iter()
                        .map(|p| (p.id, p))
                        .collect();

                    // Group lines by vendor; each group becomes one order.
                    let mut by_kiosk: BTreeMap<i64, Vec<(&cart_item::Model, &product::Model)>> =
                        BTreeMap::new();
                    let mut total_products = Decimal::ZERO;
                    for item in &cart_items {
                        if item.quantity <= 0 {
                            return Err(ServiceError::ValidationError(format!(
                                "Cart line for product {} has no quantity",
                                item.product_id
                            )));
                        }
                        let product = products.get(&item.product_id).ok_or_else(|| {
                            ServiceError::ValidationError(format!(
                                "Product {} is not available",
                                item.product_id
                            ))
                        })?;
                        if !product.active {
                            return Err(ServiceError::ValidationError(format!(
                                "Product {} is not available",
                                item.product_id
                            )));
                        }
                        total_products += product.price * Decimal::from(item.quantity);
                        by_kiosk
                            .entry(product.kiosk_user_id)
                            .or_default()
                            .push((item, product));
                    }

                    let session = checkout_session::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        user_id: Set(user_id),
                        cart_id: Set(cart_id),
                        status: Set(CheckoutSessionStatus::Pending),
                        total_products: Set(total_products),
                        expires_at: Set(now + session_window),
                        paid_at: Set(None),
                        cancelled_at: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let mut orders = Vec::with_capacity(by_kiosk.len());
                    let mut all_holds = Vec::new();
                    for (kiosk_user_id, lines) in by_kiosk {
                        let subtotal: Decimal = lines
                            .iter()
                            .map(|(item, product)| product.price * Decimal::from(item.quantity))
                            .sum();
                        let order = order::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            checkout_session_id: Set(session.id),
                            user_id: Set(user_id),
                            kiosk_user_id: Set(kiosk_user_id),
                            status: Set(OrderStatus::PendingKioskConfirmation),
                            subtotal_products: Set(subtotal),
                            accepted_at: Set(None),
                            rejected_at: Set(None),
                            paid_at: Set(None),
                            expires_at: Set(Some(now + kiosk_response_window)),
                            payment_info: Set(None),
                            created_at: Set(now),
                            updated_at: Set(now),
                        }
                        .insert(txn)
                        .await?;

                        let mut items = Vec::with_capacity(lines.len());
                        for (item, product) in lines {
                            let line = order_item::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                order_id: Set(order.id),
                                product_id: Set(item.product_id),
                                product_name: Set(product.name.clone()),
                                quantity: Set(item.quantity),
                                unit_price: Set(product.price),
                                subtotal: Set(product.price * Decimal::from(item.quantity)),
                                created_at: Set(now),
                            }
                            .insert(txn)
                            .await?;
                            items.push(line);
                        }

                        let holds =
                            create_reservations(txn, &order, &items, now + session_window).await?;
                        all_holds.extend(holds);
                        orders.push((order, items));
                    }

                    let mut update: cart::ActiveModel = cart.into();
                    update.status = Set(CartStatus::Checkout);
                    update.updated_at = Set(now);
                    update.update(txn).await?;

                    Ok((session, orders, all_holds))
                })
            })
            .await?;

        ORDERS_CREATED.inc_by(orders.len() as u64);
        RESERVATIONS_CREATED.inc_by(holds.len() as u64);
        info!(
            session_id = %session.id,
            cart_id = %cart_id,
            order_count = orders.len(),
            holds = holds.len(),
            total = %session.total_products,
            "Checkout session created"
        );

        self.event_sender
            .send(Event::CheckoutSessionCreated {
                session_id: session.id,
                order_count: orders.len(),
            })
            .await
            .map_err(ServiceError::EventError)?;
        for (order, items) in &orders {
            self.event_sender
                .send(Event::OrderCreated {
                    order_id: order.id,
                    kiosk_user_id: order.kiosk_user_id,
                })
                .await
                .map_err(ServiceError::EventError)?;
            for item in items {
                let batches: Vec<Uuid> = holds
                    .iter()
                    .filter(|hold| hold.order_item_id == item.id)
                    .map(|hold| hold.batch_id)
                    .collect();
                self.event_sender
                    .send(Event::StockReserved {
                        order_id: order.id,
                        product_id: item.product_id,
                        quantity: item.quantity,
                        batches,
                    })
                    .await
                    .map_err(ServiceError::EventError)?;
            }
        }

        Ok(CheckoutSessionDetails {
            session: session.into(),
            orders: orders
                .into_iter()
                .map(|(order, items)| OrderDetails {
                    order: order.into(),
                    items: items.into_iter().map(Into::into).collect(),
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: Uuid) -> Result<CheckoutSessionDetails, ServiceError> {
        let session = CheckoutSession::find_by_id(session_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Checkout session {} not found", session_id))
            })?;
        let orders = Order::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await?;

        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.eq(order.id))
                .order_by_asc(order_item::Column::CreatedAt)
                .all(self.db_pool.as_ref())
                .await?;
            details.push(OrderDetails {
                order: order.into(),
                items: items.into_iter().map(Into::into).collect(),
            });
        }
        Ok(CheckoutSessionDetails {
            session: session.into(),
            orders: details,
        })
    }

    /// Freezes an all-accepted session for payment: every order moves to
    /// READY_FOR_PAYMENT and the session to PROCESSING, all with the payment
    /// deadline as their new expiry.
    #[instrument(skip(self))]
    pub async fn begin_payment(&self, session_id: Uuid) -> Result<CheckoutSessionResponse, ServiceError> {
        let payment_window = self.payment_window;
        let (session, order_ids) = self
            .db_pool
            .transaction::<_, (checkout_session::Model, Vec<Uuid>), ServiceError>(move |txn| {
                Box::pin(async move {
                    let session = load_session_for_update(txn, session_id).await?;
                    if session.status != CheckoutSessionStatus::Pending {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Checkout session {} cannot start payment from status {}",
                            session.id, session.status
                        )));
                    }

                    let orders = orders_of_session(txn, session_id).await?;
                    for order in &orders {
                        if order.status != OrderStatus::Accepted {
                            return Err(ServiceError::InvalidStatus(format!(
                                "Order {} is not accepted. Current status: {}",
                                order.id, order.status
                            )));
                        }
                    }

                    let now = Utc::now();
                    let deadline = now + payment_window;
                    let mut order_ids = Vec::with_capacity(orders.len());
                    for order in orders {
                        order_ids.push(order.id);
                        let mut update: order::ActiveModel = order.into();
                        update.status = Set(OrderStatus::ReadyForPayment);
                        update.expires_at = Set(Some(deadline));
                        update.updated_at = Set(now);
                        update.update(txn).await?;
                    }

                    let mut update: checkout_session::ActiveModel = session.into();
                    update.status = Set(CheckoutSessionStatus::Processing);
                    update.expires_at = Set(deadline);
                    update.updated_at = Set(now);
                    Ok((update.update(txn).await?, order_ids))
                })
            })
            .await?;

        info!(
            session_id = %session_id,
            orders = order_ids.len(),
            expires_at = %session.expires_at,
            "Checkout session ready for payment"
        );
        for order_id in order_ids {
            self.event_sender
                .send(Event::OrderReadyForPayment(order_id))
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(session.into())
    }

    /// Settles a session after the payment gateway confirms: every order is
    /// marked PAID and its holds are consumed, in one transaction.
    #[instrument(skip(self, payment_info))]
    pub async fn process_payment_success(
        &self,
        session_id: Uuid,
        payment_info: serde_json::Value,
    ) -> Result<CheckoutSessionDetails, ServiceError> {
        let result = self
            .db_pool
            .transaction::<_, (checkout_session::Model, Vec<(Uuid, u64)>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let session = load_session_for_update(txn, session_id).await?;
                        if !session.status.is_open() {
                            return Err(ServiceError::InvalidStatus(format!(
                                "Checkout session {} is not awaiting payment (status {})",
                                session.id, session.status
                            )));
                        }

                        let orders = orders_of_session(txn, session_id).await?;
                        for order in &orders {
                            if !order.status.can_mark_paid() {
                                return Err(ServiceError::InvalidStatus(format!(
                                    "Order {} is not ready for payment. Current status: {}",
                                    order.id, order.status
                                )));
                            }
                        }

                        let mut paid = Vec::with_capacity(orders.len());
                        for order in &orders {
                            let (_, consumed) =
                                mark_order_paid(txn, order.id, Some(payment_info.clone())).await?;
                            paid.push((order.id, consumed));
                        }

                        let now = Utc::now();
                        let mut update: checkout_session::ActiveModel = session.into();
                        update.status = Set(CheckoutSessionStatus::Completed);
                        update.paid_at = Set(Some(now));
                        update.updated_at = Set(now);
                        Ok((update.update(txn).await?, paid))
                    })
                },
            )
            .await;

        let (session, paid) = match result {
            Ok(value) => value,
            Err(e) => {
                CHECKOUT_FAILURES.inc();
                return Err(ServiceError::from(e));
            }
        };

        CHECKOUTS_COMPLETED.inc();
        info!(
            session_id = %session_id,
            orders = paid.len(),
            "Checkout session paid"
        );
        self.event_sender
            .send(Event::CheckoutSessionCompleted(session_id))
            .await
            .map_err(ServiceError::EventError)?;
        for (order_id, consumed) in paid {
            self.event_sender
                .send(Event::OrderPaid(order_id))
                .await
                .map_err(ServiceError::EventError)?;
            if consumed > 0 {
                self.event_sender
                    .send(Event::ReservationsConsumed {
                        order_id,
                        count: consumed,
                    })
                    .await
                    .map_err(ServiceError::EventError)?;
            }
        }

        self.get_session(session_id).await.map(|mut details| {
            details.session = session.into();
            details
        })
    }

    /// Buyer abandons the purchase before paying. Pre-payment orders are
    /// cancelled with their holds released, and the cart reopens for edits.
    #[instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: Uuid) -> Result<CheckoutSessionResponse, ServiceError> {
        let (session, cancelled) = self
            .db_pool
            .transaction::<_, (checkout_session::Model, Vec<Uuid>), ServiceError>(move |txn| {
                Box::pin(async move {
                    let session = load_session_for_update(txn, session_id).await?;
                    if !session.status.is_open() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Checkout session {} cannot be cancelled from status {}",
                            session.id, session.status
                        )));
                    }

                    let now = Utc::now();
                    let orders = orders_of_session(txn, session_id).await?;
                    let mut cancelled = Vec::new();
                    for order in orders {
                        if cancel_order_pre_payment(txn, order.id).await?.is_some() {
                            cancelled.push(order.id);
                        }
                    }

                    reopen_cart(txn, session.cart_id, CartStatus::Active, now).await?;

                    let mut update: checkout_session::ActiveModel = session.into();
                    update.status = Set(CheckoutSessionStatus::Cancelled);
                    update.cancelled_at = Set(Some(now));
                    update.updated_at = Set(now);
                    Ok((update.update(txn).await?, cancelled))
                })
            })
            .await?;

        info!(
            session_id = %session_id,
            cancelled_orders = cancelled.len(),
            "Checkout session cancelled"
        );
        self.event_sender
            .send(Event::CheckoutSessionCancelled(session_id))
            .await
            .map_err(ServiceError::EventError)?;
        for order_id in cancelled {
            self.event_sender
                .send(Event::OrderCancelled(order_id))
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(session.into())
    }

    /// Sweep: expires open sessions whose deadline has passed, cancelling
    /// their pre-payment orders. Each session gets its own transaction.
    #[instrument(skip(self))]
    pub async fn process_expired_sessions(&self, limit: u64) -> Result<SessionSweep, ServiceError> {
        let now = Utc::now();
        let due = CheckoutSession::find()
            .filter(checkout_session::Column::Status.is_in([
                CheckoutSessionStatus::Pending,
                CheckoutSessionStatus::Processing,
            ]))
            .filter(checkout_session::Column::ExpiresAt.lte(now))
            .order_by_asc(checkout_session::Column::ExpiresAt)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await?;

        let mut sweep = SessionSweep::default();
        for session in due {
            match self.expire_one_session(session.id).await {
                Ok(true) => {
                    sweep.expired += 1;
                    self.event_sender
                        .send(Event::CheckoutSessionExpired(session.id))
                        .await
                        .map_err(ServiceError::EventError)?;
                }
                Ok(false) => {}
                Err(e) => {
                    sweep.failed += 1;
                    warn!(session_id = %session.id, error = %e, "Failed to expire checkout session");
                }
            }
        }
        if sweep.expired > 0 || sweep.failed > 0 {
            info!(
                expired = sweep.expired,
                failed = sweep.failed,
                "Checkout session sweep finished"
            );
        }
        Ok(sweep)
    }

    async fn expire_one_session(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        self.db_pool
            .transaction::<_, bool, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let session = load_session_for_update(txn, session_id).await?;
                    if !session.status.is_open() || session.expires_at > now {
                        return Ok(false);
                    }

                    let orders = orders_of_session(txn, session_id).await?;
                    for order in orders {
                        cancel_order_pre_payment(txn, order.id).await?;
                    }

                    reopen_cart(txn, session.cart_id, CartStatus::Abandoned, now).await?;

                    let mut update: checkout_session::ActiveModel = session.into();
                    update.status = Set(CheckoutSessionStatus::Expired);
                    update.updated_at = Set(now);
                    update.update(txn).await?;
                    Ok(true)
                })
            })
            .await
            .map_err(ServiceError::from)
    }
}

/// Returns a cart that checkout had frozen to its next status. Carts that
/// moved on some other way are left untouched.
async fn reopen_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    next: CartStatus,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let cart = Cart::find_by_id(cart_id).lock_exclusive().one(conn).await?;
    if let Some(cart) = cart {
        if cart.status == CartStatus::Checkout {
            let mut update: cart::ActiveModel = cart.into();
            update.status = Set(next);
            update.updated_at = Set(now);
            update.update(conn).await?;
        }
    }
    Ok(())
}
