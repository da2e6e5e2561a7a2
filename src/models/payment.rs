use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
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
pub enum PaymentMethod {
    #[sea_orm(string_value = "invoice")]
    Invoice,
    #[sea_orm(string_value = "virtual_account")]
    VirtualAccount,
    #[sea_orm(string_value = "ewallet")]
    Ewallet,
    #[sea_orm(string_value = "retail_outlet")]
    RetailOutlet,
}

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
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "settlement")]
    Settlement,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl PaymentStatus {
    /// `pending -> settlement|failed`, `failed -> settlement`. Settlement is final.
    pub fn can_become(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Settlement) | (Pending, Failed) | (Failed, Settlement)
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    /// Bank or channel code chosen by the guest
    pub payment_channel: Option<String>,
    pub gateway_source: String,
    pub payment_status: PaymentStatus,
    pub transaction_type: String,
    pub amount: i64,
    pub currency: String,
    /// Id we hand to the gateway and expect back in callbacks
    #[sea_orm(unique)]
    pub correlation_id: String,
    /// Id the gateway assigned on creation
    pub gateway_reference: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub payment_url: Option<String>,
    /// Union of every gateway response and callback for this attempt
    #[sea_orm(column_type = "Json", nullable)]
    pub callback_response: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Merges `incoming` into `envelope`: a key union where later writes win and
/// nothing is removed. Non-object inputs are stored under `raw`.
pub fn merge_envelope(envelope: Option<&Json>, incoming: &Json) -> Json {
    let mut merged = match envelope {
        Some(Json::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("raw".to_string(), other.clone());
            map
        }
        None => serde_json::Map::new(),
    };

    match incoming {
        Json::Object(fields) => {
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
        }
        other => {
            merged.insert("raw".to_string(), other.clone());
        }
    }

    Json::Object(merged)
}
