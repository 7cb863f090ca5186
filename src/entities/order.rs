use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One vendor's share of a checkout session. Every status transition drives
/// a reservation side effect: accept extends the holds, reject/timeout/cancel
/// release them, payment consumes them.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub checkout_session_id: Uuid,
    pub user_id: Uuid,
    pub kiosk_user_id: i64,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub subtotal_products: Decimal,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Deadline for the phase the order is in: kiosk response while pending,
    /// payment once accepted. Enforced by the sweepers, not by the request.
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque payment-gateway metadata, persisted uninterpreted.
    #[sea_orm(column_type = "Json", nullable)]
    pub payment_info: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::checkout_session::Entity",
        from = "Column::CheckoutSessionId",
        to = "super::checkout_session::Column::Id"
    )]
    CheckoutSession,
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::batch_reservation::Entity")]
    Reservations,
}

impl Related<super::checkout_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckoutSession.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::batch_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING_KIOSK_CONFIRMATION")]
    PendingKioskConfirmation,
    #[sea_orm(string_value = "ACCEPTED")]
    Accepted,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "READY_FOR_PAYMENT")]
    ReadyForPayment,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "CANCEL_REQUESTED")]
    CancelRequested,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "AUTO_REJECTED_TIMEOUT")]
    AutoRejectedTimeout,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingKioskConfirmation => "PENDING_KIOSK_CONFIRMATION",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::ReadyForPayment => "READY_FOR_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::CancelRequested => "CANCEL_REQUESTED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::AutoRejectedTimeout => "AUTO_REJECTED_TIMEOUT",
        }
    }

    /// Kiosk accept/reject and the timeout sweep only act on pending orders.
    pub fn is_pending(&self) -> bool {
        matches!(self, OrderStatus::PendingKioskConfirmation)
    }

    pub fn can_mark_ready_for_payment(&self) -> bool {
        matches!(self, OrderStatus::Accepted)
    }

    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Accepted | OrderStatus::ReadyForPayment)
    }

    /// Pre-payment statuses that cancel directly, releasing their holds.
    pub fn can_cancel_before_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingKioskConfirmation
                | OrderStatus::Accepted
                | OrderStatus::ReadyForPayment
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected
                | OrderStatus::Paid
                | OrderStatus::Cancelled
                | OrderStatus::AutoRejectedTimeout
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
