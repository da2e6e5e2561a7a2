//! Coupon usage slots.
//!
//! Every mutation is a guarded write at the storage layer, so concurrent
//! handler instances can consume and release slots without in-process locks.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{is_unique_violation, CouponRejection, ServiceError};
use crate::models::coupon::{self, Entity as Coupon, Model as CouponModel};
use crate::models::coupon_usage::{self, Entity as CouponUsage, Model as CouponUsageModel};

/// Result of [`CouponLedger::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    /// A slot was taken and this usage row written.
    Recorded(CouponUsageModel),
    /// The order already held a usage; nothing changed.
    AlreadyConsumed(CouponUsageModel),
}

impl Consumption {
    pub fn usage(&self) -> &CouponUsageModel {
        match self {
            Consumption::Recorded(usage) | Consumption::AlreadyConsumed(usage) => usage,
        }
    }
}

/// What a usage row records about the order that consumed the slot.
#[derive(Debug, Clone, Copy)]
pub struct UsageClaim {
    pub coupon_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub discount_amount: i64,
    pub order_amount: i64,
}

pub struct CouponLedger;

impl CouponLedger {
    /// Number of usages `user_id` holds on `coupon_id`.
    pub async fn user_usage_count<C>(
        conn: &C,
        coupon_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let count = CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .filter(coupon_usage::Column::UserId.eq(user_id))
            .count(conn)
            .await?;
        Ok(count)
    }

    /// Whether the global and per-user allowances both have room for `user_id`.
    pub async fn can_consume<C>(
        conn: &C,
        coupon: &CouponModel,
        user_id: Uuid,
    ) -> Result<bool, ServiceError>
    where
        C: ConnectionTrait,
    {
        if !coupon.has_free_slot() {
            return Ok(false);
        }
        match coupon.user_limit {
            Some(limit) => {
                let used = Self::user_usage_count(conn, coupon.id, user_id).await?;
                Ok(used < u64::try_from(limit.max(0)).unwrap_or(0))
            }
            None => Ok(true),
        }
    }

    /// Takes one usage slot for `claim.order_id`.
    ///
    /// The increment of `usage_count` is guarded by `usage_count < usage_limit`
    /// and commits together with the usage row. The per-user count is taken
    /// after the increment, while the coupon row is held. A second call for
    /// the same order returns the existing row untouched.
    #[instrument(skip(conn), fields(coupon_id = %claim.coupon_id, order_id = %claim.order_id))]
    pub async fn consume<C>(conn: &C, claim: UsageClaim) -> Result<Consumption, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if let Some(existing) = Self::usage_for_order(conn, claim.order_id).await? {
            debug!("order already holds a coupon usage");
            return Ok(Consumption::AlreadyConsumed(existing));
        }

        let txn = conn.begin().await?;

        // The guarded increment goes first: it holds the coupon row for the
        // rest of the transaction, so the per-user count below cannot race.
        let now = Utc::now();
        let claimed = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(claim.coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsageCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(&txn)
            .await?;

        let coupon = Coupon::find_by_id(claim.coupon_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", claim.coupon_id)))?;

        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            warn!(code = %coupon.code, "coupon usage limit reached");
            return Err(CouponRejection::UsageLimitReached.into());
        }

        if let Some(limit) = coupon.user_limit {
            let used = Self::user_usage_count(&txn, coupon.id, claim.user_id).await?;
            if used >= u64::try_from(limit.max(0)).unwrap_or(0) {
                txn.rollback().await?;
                warn!(code = %coupon.code, user_id = %claim.user_id, "coupon user limit reached");
                return Err(CouponRejection::UserLimitReached.into());
            }
        }

        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(claim.coupon_id),
            user_id: Set(claim.user_id),
            order_id: Set(claim.order_id),
            discount_amount: Set(claim.discount_amount),
            order_amount: Set(claim.order_amount),
            used_at: Set(now),
        };

        match usage.insert(&txn).await {
            Ok(row) => {
                txn.commit().await?;
                counter!("checkout.coupon.consumed", 1);
                info!(code = %coupon.code, "coupon usage recorded");
                Ok(Consumption::Recorded(row))
            }
            Err(err) if is_unique_violation(&err) => {
                // A concurrent consume for this order won; undo our increment.
                txn.rollback().await?;
                let existing = Self::usage_for_order(conn, claim.order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Conflict(format!(
                            "Coupon usage for order {} conflicted but was not found",
                            claim.order_id
                        ))
                    })?;
                Ok(Consumption::AlreadyConsumed(existing))
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err.into())
            }
        }
    }

    /// Returns the slot held by `order_id`, if any. Calling it again is a no-op.
    #[instrument(skip(conn))]
    pub async fn release<C>(conn: &C, order_id: Uuid) -> Result<bool, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let Some(usage) = Self::usage_for_order(conn, order_id).await? else {
            return Ok(false);
        };

        let txn = conn.begin().await?;
        let deleted = CouponUsage::delete_many()
            .filter(coupon_usage::Column::Id.eq(usage.id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        let decremented = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).sub(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(usage.coupon_id))
            .filter(coupon::Column::UsageCount.gt(0))
            .exec(&txn)
            .await?;
        if decremented.rows_affected == 0 {
            warn!(coupon_id = %usage.coupon_id, "usage_count already zero while releasing usage");
        }

        txn.commit().await?;
        counter!("checkout.coupon.released", 1);
        info!(coupon_id = %usage.coupon_id, "coupon usage released");
        Ok(true)
    }

    pub async fn usage_for_order<C>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<CouponUsageModel>, ServiceError>
    where
        C: ConnectionTrait,
    {
        Ok(CouponUsage::find()
            .filter(coupon_usage::Column::OrderId.eq(order_id))
            .one(conn)
            .await?)
    }
}
