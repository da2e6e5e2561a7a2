pub mod checkout;
pub mod coupons;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::gateway::PaymentGateway;
use crate::services::{
    checkout::CheckoutService, coupons::CouponService, payments::PaymentService,
    reconciler::WebhookReconciler,
};
use crate::webhooks::WebhookVerifier;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<CouponService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub reconciler: Arc<WebhookReconciler>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, gateway: Arc<dyn PaymentGateway>, config: &AppConfig) -> Self {
        let verifier = WebhookVerifier::new(config.payment_webhook_secret.clone());

        Self {
            coupons: Arc::new(CouponService::new(db_pool.clone())),
            checkout: Arc::new(CheckoutService::new(db_pool.clone(), config)),
            payments: Arc::new(PaymentService::new(db_pool.clone(), gateway, config)),
            reconciler: Arc::new(WebhookReconciler::new(db_pool, verifier)),
        }
    }
}
