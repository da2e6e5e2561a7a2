// Pure pricing
pub mod discount;

// Ledgers
pub mod coupon_ledger;
pub mod order_ledger;

// Orchestration
pub mod checkout;
pub mod coupons;
pub mod payments;
pub mod reconciler;
