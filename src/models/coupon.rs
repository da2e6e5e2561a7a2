use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent points for percentage coupons, minor units for fixed ones
    pub value: i64,
    pub minimum_amount: i64,
    /// Cap on a percentage discount
    pub maximum_discount: Option<i64>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub user_limit: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// JSON array of package ids; absent means every package
    #[sea_orm(column_type = "Json", nullable)]
    pub applicable_packages: Option<Json>,
    /// JSON array of user ids; absent means every user
    #[sea_orm(column_type = "Json", nullable)]
    pub applicable_users: Option<Json>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    Usages,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn allows_package(&self, package_id: Uuid) -> bool {
        allow_list_contains(self.applicable_packages.as_ref(), package_id)
    }

    pub fn allows_user(&self, user_id: Uuid) -> bool {
        allow_list_contains(self.applicable_users.as_ref(), user_id)
    }

    /// Whether the global usage allowance still has a free slot.
    pub fn has_free_slot(&self) -> bool {
        self.usage_limit
            .map_or(true, |limit| self.usage_count < limit)
    }
}

/// An absent list admits everyone. A present list that is not an array of ids
/// admits no one.
fn allow_list_contains(list: Option<&Json>, id: Uuid) -> bool {
    let Some(list) = list else {
        return true;
    };
    match list.as_array() {
        Some(items) => items.iter().any(|item| {
            item.as_str()
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .is_some_and(|candidate| candidate == id)
        }),
        None => false,
    }
}
