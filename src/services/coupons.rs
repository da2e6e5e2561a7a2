use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::errors::{CouponRejection, ServiceError};
use crate::models::coupon::{self, DiscountType, Entity as Coupon, Model as CouponModel};
use crate::services::coupon_ledger::CouponLedger;
use crate::services::discount::{DiscountEngine, OrderContext};

/// Input for creating a coupon.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_coupon_terms"))]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub discount_type: DiscountType,
    #[validate(range(min = 0))]
    pub value: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub minimum_amount: i64,
    pub maximum_discount: Option<i64>,
    #[validate(range(min = 0))]
    pub usage_limit: Option<i32>,
    #[validate(range(min = 0))]
    pub user_limit: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub applicable_packages: Option<Vec<Uuid>>,
    pub applicable_users: Option<Vec<Uuid>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

fn validate_coupon_terms(input: &CreateCouponInput) -> Result<(), ValidationError> {
    match input.discount_type {
        DiscountType::Percentage if input.value > 100 => {
            let mut err = ValidationError::new("value");
            err.message = Some("Percentage coupons cannot exceed 100".into());
            return Err(err);
        }
        DiscountType::Fixed if input.maximum_discount.is_some() => {
            let mut err = ValidationError::new("maximum_discount");
            err.message = Some("maximum_discount only applies to percentage coupons".into());
            return Err(err);
        }
        _ => {}
    }

    if input.maximum_discount.is_some_and(|cap| cap < 0) {
        let mut err = ValidationError::new("maximum_discount");
        err.message = Some("maximum_discount must not be negative".into());
        return Err(err);
    }

    if let (Some(starts_at), Some(expires_at)) = (input.starts_at, input.expires_at) {
        if starts_at > expires_at {
            let mut err = ValidationError::new("expires_at");
            err.message = Some("expires_at must not precede starts_at".into());
            return Err(err);
        }
    }

    Ok(())
}

/// Coupon codes are matched case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PreviewRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub user_id: Uuid,
    pub package_id: Uuid,
    /// Order amount in minor currency units
    #[validate(range(min = 0))]
    pub amount: i64,
}

/// Read-only verdict for a coupon against an order context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PreviewResult {
    pub code: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CouponRejection>,
    pub amount: i64,
    pub discount: i64,
    pub final_amount: i64,
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(&self, input: CreateCouponInput) -> Result<CouponModel, ServiceError> {
        input.validate()?;

        let code = normalize_code(&input.code);
        if self.find_by_code(&code).await?.is_some() {
            return Err(ServiceError::Conflict(format!("Coupon code {} already exists", code)));
        }

        let to_json = |ids: Option<Vec<Uuid>>| {
            ids.map(|ids| {
                serde_json::Value::Array(
                    ids.into_iter()
                        .map(|id| serde_json::Value::String(id.to_string()))
                        .collect(),
                )
            })
        };

        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            minimum_amount: Set(input.minimum_amount),
            maximum_discount: Set(input.maximum_discount),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            user_limit: Set(input.user_limit),
            starts_at: Set(input.starts_at),
            expires_at: Set(input.expires_at),
            applicable_packages: Set(to_json(input.applicable_packages)),
            applicable_users: Set(to_json(input.applicable_users)),
            is_active: Set(input.is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        let created = model.insert(&*self.db).await.map_err(|err| {
            if crate::errors::is_unique_violation(&err) {
                ServiceError::Conflict(format!("Coupon code {} already exists", code))
            } else {
                ServiceError::from(err)
            }
        })?;

        info!(coupon_id = %created.id, "coupon created");
        Ok(created)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        Ok(Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?)
    }

    /// Prices `code` for the given context without consuming anything.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn preview(&self, request: PreviewRequest) -> Result<PreviewResult, ServiceError> {
        request.validate()?;

        let code = normalize_code(&request.code);
        let rejected = |reason| PreviewResult {
            code: code.clone(),
            valid: false,
            reason: Some(reason),
            amount: request.amount,
            discount: 0,
            final_amount: request.amount,
        };

        let Some(coupon) = self.find_by_code(&code).await? else {
            return Ok(rejected(CouponRejection::CouponNotFound));
        };

        let used = CouponLedger::user_usage_count(&*self.db, coupon.id, request.user_id).await?;
        let ctx = OrderContext {
            user_id: request.user_id,
            package_id: request.package_id,
            amount: request.amount,
        };

        match DiscountEngine::evaluate(&coupon, &ctx, used, Utc::now()) {
            Ok(quote) => Ok(PreviewResult {
                code: code.clone(),
                valid: true,
                reason: None,
                amount: request.amount,
                discount: quote.discount,
                final_amount: quote.final_amount,
            }),
            Err(reason) => Ok(rejected(reason)),
        }
    }
}
