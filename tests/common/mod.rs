use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use feria_api::config::AppConfig;
use feria_api::db;
use feria_api::entities::batch::{self, BatchStatus};
use feria_api::entities::batch_reservation;
use feria_api::entities::cart::{self, CartStatus};
use feria_api::entities::cart_item;
use feria_api::entities::checkout_session;
use feria_api::entities::order;
use feria_api::entities::product;
use feria_api::entities::stock_movement::{self, StockMovementType};
use feria_api::events::{process_events, EventSender};
use feria_api::handlers::AppServices;

/// Test harness backed by an in-memory SQLite database.
///
/// The pool is capped at a single connection so the memory database is
/// shared by every query in the test.
pub struct TestApp {
    pub services: AppServices,
    pub db: Arc<db::DbPool>,
    pub config: AppConfig,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(process_events(rx));

        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender), &cfg);

        Self {
            services,
            db: db_arc,
            config: cfg,
            _event_task: event_task,
        }
    }

    pub async fn seed_product(
        &self,
        kiosk_user_id: i64,
        price: Decimal,
        duration_days: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            kiosk_user_id: Set(kiosk_user_id),
            name: Set(format!("Product {}", kiosk_user_id)),
            price: Set(price),
            duration_days: Set(duration_days),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to seed product")
    }

    /// Insert a batch row directly, with its opening ledger entry. Lets
    /// tests construct states `create_batch` refuses, like an already
    /// expired lot.
    pub async fn seed_batch(
        &self,
        product_id: Uuid,
        production_date: NaiveDate,
        expiration_date: NaiveDate,
        quantity: i32,
    ) -> batch::Model {
        let now = Utc::now();
        let status = if quantity > 0 {
            BatchStatus::Active
        } else {
            BatchStatus::Depleted
        };
        let batch = batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_number: Set(format!(
                "LOTE-{}",
                &Uuid::new_v4().simple().to_string()[..12]
            )),
            product_id: Set(product_id),
            production_date: Set(production_date),
            expiration_date: Set(expiration_date),
            initial_quantity: Set(quantity),
            current_quantity: Set(quantity),
            reserved_quantity: Set(0),
            status: Set(status),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to seed batch");

        if quantity > 0 {
            stock_movement::ActiveModel {
                id: Set(Uuid::new_v4()),
                batch_id: Set(batch.id),
                movement_type: Set(StockMovementType::Restock),
                delta: Set(quantity),
                created_at: Set(now),
            }
            .insert(self.db.as_ref())
            .await
            .expect("failed to seed opening movement");
        }
        batch
    }

    pub async fn seed_cart(&self, user_id: Uuid, lines: &[(Uuid, i32)]) -> cart::Model {
        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            status: Set(CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to seed cart");

        for (product_id, quantity) in lines {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(self.db.as_ref())
            .await
            .expect("failed to seed cart item");
        }
        cart
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> batch::Model {
        batch::Entity::find_by_id(batch_id)
            .one(self.db.as_ref())
            .await
            .expect("batch query failed")
            .expect("batch not found")
    }

    pub async fn get_cart(&self, cart_id: Uuid) -> cart::Model {
        cart::Entity::find_by_id(cart_id)
            .one(self.db.as_ref())
            .await
            .expect("cart query failed")
            .expect("cart not found")
    }

    /// Backdate an order's deadline so the sweeps see it as overdue.
    pub async fn backdate_order(&self, order_id: Uuid) {
        let past = Utc::now() - Duration::minutes(1);
        let mut update: order::ActiveModel = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .expect("order query failed")
            .expect("order not found")
            .into();
        update.expires_at = Set(Some(past));
        update
            .update(self.db.as_ref())
            .await
            .expect("backdate failed");
    }

    /// Backdate every hold of an order.
    pub async fn backdate_reservations(&self, order_id: Uuid) {
        let past = Utc::now() - Duration::minutes(1);
        let holds = batch_reservation::Entity::find()
            .filter(batch_reservation::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await
            .expect("reservation query failed");
        for hold in holds {
            let mut update: batch_reservation::ActiveModel = hold.into();
            update.expires_at = Set(past);
            update
                .update(self.db.as_ref())
                .await
                .expect("backdate failed");
        }
    }

    /// Backdate a checkout session's deadline.
    pub async fn backdate_session(&self, session_id: Uuid) {
        let past = Utc::now() - Duration::minutes(1);
        let mut update: checkout_session::ActiveModel =
            checkout_session::Entity::find_by_id(session_id)
                .one(self.db.as_ref())
                .await
                .expect("session query failed")
                .expect("session not found")
                .into();
        update.expires_at = Set(past);
        update
            .update(self.db.as_ref())
            .await
            .expect("backdate failed");
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn days_from_today(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}
