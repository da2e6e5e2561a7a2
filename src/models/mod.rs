pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod package;
pub mod payment;

pub use coupon::{DiscountType, Entity as CouponEntity, Model as CouponModel};
pub use coupon_usage::{Entity as CouponUsageEntity, Model as CouponUsageModel};
pub use order::{Entity as OrderEntity, Model as OrderModel, OrderStatus};
pub use package::{Entity as PackageEntity, Model as PackageModel};
pub use payment::{
    Entity as PaymentEntity, Model as PaymentModel, PaymentMethod, PaymentStatus,
};
