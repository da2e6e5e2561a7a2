use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::payment::PaymentMethod;

/// Stored order states. `expired` is derived from `expired_at` and never stored.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "void")]
    Void,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
    /// Package price minus discount
    pub total_price: i64,
    /// Disambiguator added for bank-transfer matching
    pub unique_price: i64,
    pub discount_amount: i64,
    pub coupon_id: Option<Uuid>,
    pub payment_type: Option<PaymentMethod>,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_void: bool,
    pub void_at: Option<DateTime<Utc>>,
    pub expired_at: DateTime<Utc>,
    pub external_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::package::Entity",
        from = "Column::PackageId",
        to = "super::package::Column::Id"
    )]
    Package,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::package::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Package.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Amount the guest is asked to pay.
    pub fn final_price(&self) -> i64 {
        self.total_price + self.unique_price
    }

    /// The gross amount before any coupon was applied.
    pub fn gross_amount(&self) -> i64 {
        self.total_price + self.discount_amount
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.expired_at < now
    }
}
