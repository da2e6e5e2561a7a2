//! Coupon validation and pricing.
//!
//! Everything here is side-effect free: evaluating a coupon never consumes a
//! usage slot, so the same code path serves previews and checkout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::CouponRejection;
use crate::models::coupon::{DiscountType, Model as CouponModel};

/// Who is buying what, for how much (minor currency units).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderContext {
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub amount: i64,
}

/// A priced, valid coupon application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Quote {
    pub discount: i64,
    pub final_amount: i64,
}

pub struct DiscountEngine;

impl DiscountEngine {
    /// Validates `coupon` against `ctx` and prices it.
    ///
    /// Checks run in a fixed order and the first failure is returned.
    /// `user_usage_count` is the number of usages this user already holds.
    pub fn evaluate(
        coupon: &CouponModel,
        ctx: &OrderContext,
        user_usage_count: u64,
        now: DateTime<Utc>,
    ) -> Result<Quote, CouponRejection> {
        if !coupon.is_active {
            return Err(CouponRejection::Inactive);
        }

        if coupon.starts_at.is_some_and(|starts_at| now < starts_at) {
            return Err(CouponRejection::NotStarted);
        }
        if coupon.expires_at.is_some_and(|expires_at| now > expires_at) {
            return Err(CouponRejection::Expired);
        }

        if !coupon.has_free_slot() {
            return Err(CouponRejection::UsageLimitReached);
        }

        if let Some(user_limit) = coupon.user_limit {
            if user_usage_count >= u64::try_from(user_limit.max(0)).unwrap_or(0) {
                return Err(CouponRejection::UserLimitReached);
            }
        }

        if !coupon.allows_user(ctx.user_id) {
            return Err(CouponRejection::UserNotEligible);
        }

        if !coupon.allows_package(ctx.package_id) {
            return Err(CouponRejection::PackageNotEligible);
        }

        if ctx.amount < coupon.minimum_amount {
            return Err(CouponRejection::BelowMinimumAmount);
        }

        let discount = Self::calculate_discount(coupon, ctx.amount);
        Ok(Quote {
            discount,
            final_amount: ctx.amount - discount,
        })
    }

    /// Discount for `amount`, always within `0..=amount`.
    pub fn calculate_discount(coupon: &CouponModel, amount: i64) -> i64 {
        let amount = amount.max(0);
        let value = coupon.value.max(0);

        let raw = match coupon.discount_type {
            DiscountType::Percentage => {
                let pct = i128::from(amount) * i128::from(value) / 100;
                let pct = i64::try_from(pct).unwrap_or(i64::MAX);
                match coupon.maximum_discount {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            DiscountType::Fixed => value,
        };

        raw.clamp(0, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn coupon(discount_type: DiscountType, value: i64) -> CouponModel {
        CouponModel {
            id: Uuid::new_v4(),
            code: "TEST".into(),
            discount_type,
            value,
            minimum_amount: 0,
            maximum_discount: None,
            usage_limit: None,
            usage_count: 0,
            user_limit: None,
            starts_at: None,
            expires_at: None,
            applicable_packages: None,
            applicable_users: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn ctx(amount: i64) -> OrderContext {
        OrderContext {
            user_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            amount,
        }
    }

    #[test]
    fn save20_is_capped_at_maximum_discount() {
        let mut c = coupon(DiscountType::Percentage, 20);
        c.code = "SAVE20".into();
        c.maximum_discount = Some(10_000);

        let quote = DiscountEngine::evaluate(&c, &ctx(100_000), 0, Utc::now()).unwrap();
        assert_eq!(quote.discount, 10_000);
        assert_eq!(quote.final_amount, 90_000);
    }

    #[test]
    fn percentage_rounds_down() {
        let c = coupon(DiscountType::Percentage, 15);
        assert_eq!(DiscountEngine::calculate_discount(&c, 999), 149);
    }

    #[test]
    fn fixed_discount_never_exceeds_amount() {
        let c = coupon(DiscountType::Fixed, 50_000);
        assert_eq!(DiscountEngine::calculate_discount(&c, 20_000), 20_000);
    }

    #[test]
    fn inactive_wins_over_every_other_failure() {
        let mut c = coupon(DiscountType::Fixed, 1);
        c.is_active = false;
        c.expires_at = Some(Utc::now() - Duration::days(1));
        c.minimum_amount = 1_000_000;
        assert_eq!(
            DiscountEngine::evaluate(&c, &ctx(10), 0, Utc::now()),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn window_bounds_are_checked() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, 1);
        c.starts_at = Some(now + Duration::hours(1));
        assert_eq!(
            DiscountEngine::evaluate(&c, &ctx(10), 0, now),
            Err(CouponRejection::NotStarted)
        );

        c.starts_at = None;
        c.expires_at = Some(now - Duration::seconds(1));
        assert_eq!(
            DiscountEngine::evaluate(&c, &ctx(10), 0, now),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn usage_limit_checked_before_user_limit() {
        let mut c = coupon(DiscountType::Fixed, 1);
        c.usage_limit = Some(3);
        c.usage_count = 3;
        c.user_limit = Some(1);
        assert_eq!(
            DiscountEngine::evaluate(&c, &ctx(10), 5, Utc::now()),
            Err(CouponRejection::UsageLimitReached)
        );

        c.usage_count = 2;
        assert_eq!(
            DiscountEngine::evaluate(&c, &ctx(10), 1, Utc::now()),
            Err(CouponRejection::UserLimitReached)
        );
        assert!(DiscountEngine::evaluate(&c, &ctx(10), 0, Utc::now()).is_ok());
    }

    #[test]
    fn allow_lists_are_enforced() {
        let context = ctx(10);
        let mut c = coupon(DiscountType::Fixed, 1);
        c.applicable_users = Some(json!([Uuid::new_v4().to_string()]));
        assert_eq!(
            DiscountEngine::evaluate(&c, &context, 0, Utc::now()),
            Err(CouponRejection::UserNotEligible)
        );

        c.applicable_users = Some(json!([context.user_id.to_string()]));
        c.applicable_packages = Some(json!([]));
        assert_eq!(
            DiscountEngine::evaluate(&c, &context, 0, Utc::now()),
            Err(CouponRejection::PackageNotEligible)
        );
    }

    #[test]
    fn minimum_amount_is_inclusive() {
        let mut c = coupon(DiscountType::Fixed, 100);
        c.minimum_amount = 5_000;
        assert_eq!(
            DiscountEngine::evaluate(&c, &ctx(4_999), 0, Utc::now()),
            Err(CouponRejection::BelowMinimumAmount)
        );
        assert!(DiscountEngine::evaluate(&c, &ctx(5_000), 0, Utc::now()).is_ok());
    }
}
