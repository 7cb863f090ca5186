use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A dated lot of one product. Quantities only move through the stock ledger
/// and reservation primitives; nothing else writes `current_quantity` or
/// `reserved_quantity`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human lot code, e.g. `LOTE-20240620-001`. Unique per batch.
    #[sea_orm(unique)]
    pub batch_number: String,
    pub product_id: Uuid,
    pub production_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub initial_quantity: i32,
    pub current_quantity: i32,
    pub reserved_quantity: i32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Stock that can still be promised to new reservations.
    pub fn available(&self) -> i32 {
        self.current_quantity - self.reserved_quantity
    }

    /// A batch expires once its expiration date is strictly in the past;
    /// stock is sellable through the whole of its best-before day.
    pub fn is_date_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date < today
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
    #[sea_orm(has_many = "super::batch_reservation::Entity")]
    Reservations,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

impl Related<super::batch_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum BatchStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "DEPLETED")]
    Depleted,
    #[sea_orm(string_value = "MANUAL_OUT")]
    ManualOut,
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
    #[sea_orm(string_value = "DELETED")]
    Deleted,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "ACTIVE",
            BatchStatus::Depleted => "DEPLETED",
            BatchStatus::ManualOut => "MANUAL_OUT",
            BatchStatus::Expired => "EXPIRED",
            BatchStatus::Deleted => "DELETED",
        }
    }

    /// Soft delete is restricted to lots that hold no sellable stock.
    pub fn can_delete(&self) -> bool {
        matches!(self, BatchStatus::Depleted | BatchStatus::Expired)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single place batch status is computed. Expiration takes precedence over
/// quantity: an expired batch with stock still surfaces as EXPIRED.
/// MANUAL_OUT is sticky at zero quantity, and DELETED never comes back.
pub fn derive_status(
    previous: BatchStatus,
    quantity: i32,
    expiration_date: NaiveDate,
    today: NaiveDate,
) -> BatchStatus {
    if previous == BatchStatus::Deleted {
        return BatchStatus::Deleted;
    }
    if expiration_date < today {
        return BatchStatus::Expired;
    }
    if quantity <= 0 {
        if previous == BatchStatus::ManualOut {
            BatchStatus::ManualOut
        } else {
            BatchStatus::Depleted
        }
    } else {
        BatchStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expiration_overrides_quantity() {
        let today = day(2024, 6, 21);
        let status = derive_status(BatchStatus::Active, 40, day(2024, 6, 20), today);
        assert_eq!(status, BatchStatus::Expired);
    }

    #[test]
    fn expiring_today_is_still_active() {
        let today = day(2024, 6, 21);
        let status = derive_status(BatchStatus::Active, 40, today, today);
        assert_eq!(status, BatchStatus::Active);
    }

    #[test]
    fn zero_quantity_becomes_depleted() {
        let today = day(2024, 6, 21);
        let status = derive_status(BatchStatus::Active, 0, day(2024, 6, 30), today);
        assert_eq!(status, BatchStatus::Depleted);
    }

    #[test]
    fn manual_out_is_sticky_at_zero() {
        let today = day(2024, 6, 21);
        let status = derive_status(BatchStatus::ManualOut, 0, day(2024, 6, 30), today);
        assert_eq!(status, BatchStatus::ManualOut);
    }

    #[test]
    fn restocked_manual_out_returns_to_active() {
        let today = day(2024, 6, 21);
        let status = derive_status(BatchStatus::ManualOut, 5, day(2024, 6, 30), today);
        assert_eq!(status, BatchStatus::Active);
    }

    #[test]
    fn deleted_is_terminal() {
        let today = day(2024, 6, 21);
        assert_eq!(
            derive_status(BatchStatus::Deleted, 10, day(2024, 6, 30), today),
            BatchStatus::Deleted
        );
        assert_eq!(
            derive_status(BatchStatus::Deleted, 0, day(2024, 6, 1), today),
            BatchStatus::Deleted
        );
    }

    #[test]
    fn available_subtracts_reserved() {
        let batch = Model {
            id: Uuid::new_v4(),
            batch_number: "LOTE-20240620-001".into(),
            product_id: Uuid::new_v4(),
            production_date: day(2024, 6, 20),
            expiration_date: day(2024, 6, 27),
            initial_quantity: 100,
            current_quantity: 80,
            reserved_quantity: 30,
            status: BatchStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(batch.available(), 50);
    }
}
