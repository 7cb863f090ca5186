use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Umbrella over the per-vendor orders created from one cart. Payment and
/// cancellation fan out from here to every child order in one transaction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub status: CheckoutSessionStatus,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub total_products: Decimal,
    /// Mirrors the longest-lived reservation hold created for the session.
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id"
    )]
    Cart,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum CheckoutSessionStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl CheckoutSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutSessionStatus::Pending => "PENDING",
            CheckoutSessionStatus::Processing => "PROCESSING",
            CheckoutSessionStatus::Completed => "COMPLETED",
            CheckoutSessionStatus::Cancelled => "CANCELLED",
            CheckoutSessionStatus::Expired => "EXPIRED",
            CheckoutSessionStatus::Failed => "FAILED",
        }
    }

    /// Statuses the payment flow may still act on.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            CheckoutSessionStatus::Pending | CheckoutSessionStatus::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutSessionStatus::Completed
                | CheckoutSessionStatus::Cancelled
                | CheckoutSessionStatus::Expired
                | CheckoutSessionStatus::Failed
        )
    }
}

impl fmt::Display for CheckoutSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
