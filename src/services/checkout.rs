use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::errors::{CouponRejection, ServiceError};
use crate::models::order::{self, Model as OrderModel, OrderStatus};
use crate::models::package::Entity as Package;
use crate::models::payment::PaymentMethod;
use crate::services::coupon_ledger::CouponLedger;
use crate::services::coupons::CouponService;
use crate::services::discount::{DiscountEngine, OrderContext};
use crate::services::order_ledger::{OrderLedger, Transition};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "user_id": "0d6b3c5e-8d1f-4c4e-9a53-5f0e5e0f6a11",
    "package_id": "5a1c1f0e-7c1f-4f6b-8a5c-2b7d0d9c3e22",
    "coupon_code": "SAVE20"
}))]
pub struct StartCheckoutRequest {
    pub user_id: Uuid,
    pub package_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: Option<String>,
}

/// Order as exposed over the API, with the derived fields filled in.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub status: OrderStatus,
    /// Pending and past `expired_at`
    pub expired: bool,
    pub total_price: i64,
    pub unique_price: i64,
    pub discount_amount: i64,
    pub final_price: i64,
    pub coupon_id: Option<Uuid>,
    pub payment_type: Option<PaymentMethod>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_void: bool,
    pub void_at: Option<DateTime<Utc>>,
    pub expired_at: DateTime<Utc>,
    pub external_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderView {
    pub fn at(model: OrderModel, now: DateTime<Utc>) -> Self {
        Self {
            expired: model.is_expired(now),
            final_price: model.final_price(),
            id: model.id,
            user_id: model.user_id,
            package_id: model.package_id,
            status: model.status,
            total_price: model.total_price,
            unique_price: model.unique_price,
            discount_amount: model.discount_amount,
            coupon_id: model.coupon_id,
            payment_type: model.payment_type,
            is_paid: model.is_paid,
            paid_at: model.paid_at,
            is_void: model.is_void,
            void_at: model.void_at,
            expired_at: model.expired_at,
            external_transaction_id: model.external_transaction_id,
            created_at: model.created_at,
        }
    }
}

impl From<OrderModel> for OrderView {
    fn from(model: OrderModel) -> Self {
        Self::at(model, Utc::now())
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    order_ttl: Duration,
    unique_price_max: i64,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self {
            db,
            order_ttl: config.order_ttl(),
            unique_price_max: config.unique_price_max,
        }
    }

    /// Prices the package, applies the coupon if any and opens a pending order.
    /// No coupon slot is taken until the order is paid.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, package_id = %request.package_id))]
    pub async fn start_checkout(
        &self,
        request: StartCheckoutRequest,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;

        let package = Package::find_by_id(request.package_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Package {} not found", request.package_id))
            })?;
        if !package.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Package {} is not available",
                package.id
            )));
        }

        let gross = package.price;
        let (coupon_id, discount) = match request.coupon_code.as_deref() {
            Some(code) => {
                let coupon = CouponService::new(self.db.clone())
                    .find_by_code(code)
                    .await?
                    .ok_or(CouponRejection::CouponNotFound)?;
                let used =
                    CouponLedger::user_usage_count(&*self.db, coupon.id, request.user_id).await?;
                let ctx = OrderContext {
                    user_id: request.user_id,
                    package_id: package.id,
                    amount: gross,
                };
                let quote = DiscountEngine::evaluate(&coupon, &ctx, used, Utc::now())?;
                (Some(coupon.id), quote.discount)
            }
            None => (None, 0),
        };

        let unique_price = if self.unique_price_max > 0 {
            rand::thread_rng().gen_range(1..=self.unique_price_max)
        } else {
            0
        };

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(request.user_id),
            package_id: Set(package.id),
            total_price: Set(gross - discount),
            unique_price: Set(unique_price),
            discount_amount: Set(discount),
            coupon_id: Set(coupon_id),
            payment_type: Set(None),
            status: Set(OrderStatus::Pending),
            is_paid: Set(false),
            paid_at: Set(None),
            is_void: Set(false),
            void_at: Set(None),
            expired_at: Set(now + self.order_ttl),
            external_transaction_id: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        info!(
            order_id = %order.id,
            total_price = order.total_price,
            discount = order.discount_amount,
            "checkout order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderLedger::find(&*self.db, order_id).await
    }

    /// Cancels a pending order and hands back any coupon slot it holds.
    #[instrument(skip(self))]
    pub async fn void_order(&self, order_id: Uuid) -> Result<Transition, ServiceError> {
        let txn = self.db.begin().await?;
        let transition = match OrderLedger::mark_void(&txn, order_id).await {
            Ok(transition) => transition,
            Err(err) => {
                txn.rollback().await?;
                return Err(err);
            }
        };
        if CouponLedger::release(&txn, order_id).await? {
            warn!(order_id = %order_id, "voided order held a coupon usage");
        }
        txn.commit().await?;
        Ok(transition)
    }
}
