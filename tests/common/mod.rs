#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use invitation_checkout::{
    app_router,
    config::AppConfig,
    db,
    errors::ServiceError,
    gateway::{
        GatewayFailure, GatewayPayment, PaymentGateway, PaymentRequest, XenditGateway,
    },
    handlers::AppServices,
    models::{
        coupon::{self, DiscountType},
        order,
        package,
        payment::{self, PaymentMethod, PaymentStatus},
        CouponModel, OrderModel, PackageModel, PaymentModel,
    },
    services::{
        checkout::StartCheckoutRequest,
        coupon_ledger::CouponLedger,
        coupons::CreateCouponInput,
        reconciler::ReconcileReport,
    },
    webhooks::{signature::sign, SIGNATURE_HEADER},
    AppState,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret-0123456789abcdef";

/// Gateway double that answers every call with a fixed outcome.
pub struct StubGateway {
    outcome: Mutex<Result<(), GatewayFailure>>,
    pub calls: Mutex<Vec<PaymentRequest>>,
}

impl StubGateway {
    pub fn accepting() -> Self {
        Self {
            outcome: Mutex::new(Ok(())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: GatewayFailure) -> Self {
        Self {
            outcome: Mutex::new(Err(failure)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn source(&self) -> &'static str {
        "stub"
    }

    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GatewayPayment, GatewayFailure> {
        self.calls.lock().unwrap().push(request.clone());
        let outcome = self.outcome.lock().unwrap().clone();
        outcome.map(|_| GatewayPayment {
            reference: format!("gw-{}", request.correlation_id),
            payment_url: Some(format!("https://pay.test/{}", request.correlation_id)),
            raw: json!({
                "id": format!("gw-{}", request.correlation_id),
                "status": "PENDING",
            }),
        })
    }
}

/// Application state over a throwaway SQLite file migrated by the real migrator.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway::accepting())).await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self::build(gateway, |_| {}).await
    }

    /// App whose pool holds several connections over a WAL-mode database, so
    /// spawned tasks really do hit the database side by side.
    pub async fn concurrent() -> Self {
        Self::build(Arc::new(StubGateway::accepting()), |cfg| {
            cfg.db_max_connections = 4;
        })
        .await
    }

    /// App wired to the real HTTP gateway client pointed at `base_url`.
    pub async fn with_gateway_url(base_url: &str) -> Self {
        let gateway = XenditGateway::new(
            base_url,
            Some("xnd_test_key".to_string()),
            Duration::from_millis(500),
            3600,
        )
        .expect("gateway client");
        Self::with_gateway(Arc::new(gateway)).await
    }

    pub async fn build(
        gateway: Arc<dyn PaymentGateway>,
        configure: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("checkout.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.unique_price_max = 0;
        cfg.public_base_url = "https://invite.test".to_string();
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        if cfg.db_max_connections > 1 {
            pool.execute_unprepared("PRAGMA journal_mode=WAL")
                .await
                .expect("enable WAL");
        }
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let services = AppServices::new(db.clone(), gateway, &cfg);
        let state = AppState {
            db: db.clone(),
            config: cfg,
            services,
        };
        let router = app_router(state.clone());

        Self {
            router,
            state,
            db,
            _dir: dir,
        }
    }

    // ---- seeding ----

    pub async fn seed_package(&self, price: i64) -> PackageModel {
        package::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Premium invitation".to_string()),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("insert package")
    }

    pub async fn seed_coupon(&self, input: CreateCouponInput) -> CouponModel {
        self.state
            .services
            .coupons
            .create_coupon(input)
            .await
            .expect("create coupon")
    }

    pub async fn start_order(
        &self,
        user_id: Uuid,
        package_id: Uuid,
        coupon_code: Option<&str>,
    ) -> OrderModel {
        self.state
            .services
            .checkout
            .start_checkout(StartCheckoutRequest {
                user_id,
                package_id,
                coupon_code: coupon_code.map(str::to_string),
            })
            .await
            .expect("start checkout")
    }

    /// Inserts a pending payment attempt as if the gateway had accepted it.
    pub async fn seed_payment(&self, order: &OrderModel) -> PaymentModel {
        let correlation_id = Uuid::new_v4().to_string();
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            payment_method: Set(PaymentMethod::Invoice),
            payment_channel: Set(None),
            gateway_source: Set("stub".to_string()),
            payment_status: Set(PaymentStatus::Pending),
            transaction_type: Set("order_payment".to_string()),
            amount: Set(order.final_price()),
            currency: Set("IDR".to_string()),
            correlation_id: Set(correlation_id.clone()),
            gateway_reference: Set(Some(format!("inv-{}", correlation_id))),
            payment_url: Set(None),
            callback_response: Set(Some(json!({ "correlation_id": correlation_id }))),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("insert payment")
    }

    // ---- reloading ----

    pub async fn order(&self, id: Uuid) -> OrderModel {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn payment(&self, id: Uuid) -> PaymentModel {
        payment::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query payment")
            .expect("payment exists")
    }

    pub async fn coupon(&self, id: Uuid) -> CouponModel {
        coupon::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query coupon")
            .expect("coupon exists")
    }

    pub async fn usage_count_for(&self, coupon_id: Uuid, user_id: Uuid) -> u64 {
        CouponLedger::user_usage_count(&*self.db, coupon_id, user_id)
            .await
            .expect("count usages")
    }

    // ---- webhook deliveries ----

    pub async fn deliver(&self, body: &Value) -> Result<ReconcileReport, ServiceError> {
        let raw = serde_json::to_vec(body).expect("serialize callback");
        let signature = sign(WEBHOOK_SECRET, &raw);
        self.state
            .services
            .reconciler
            .handle(Some(&signature), &raw)
            .await
    }

    /// Signs `body` and applies it on its own task.
    pub fn spawn_delivery(
        &self,
        body: &Value,
    ) -> JoinHandle<Result<ReconcileReport, ServiceError>> {
        let raw = serde_json::to_vec(body).expect("serialize callback");
        let signature = sign(WEBHOOK_SECRET, &raw);
        let reconciler = self.state.services.reconciler.clone();
        tokio::spawn(async move { reconciler.handle(Some(signature.as_str()), &raw).await })
    }

    pub async fn deliver_with_signature(
        &self,
        body: &Value,
        signature: Option<&str>,
    ) -> Result<ReconcileReport, ServiceError> {
        let raw = serde_json::to_vec(body).expect("serialize callback");
        self.state
            .services
            .reconciler
            .handle(signature, &raw)
            .await
    }

    // ---- HTTP ----

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn post_webhook(&self, body: &Value, signature: Option<&str>) -> Response {
        let raw = serde_json::to_vec(body).expect("serialize callback");
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(raw)).expect("request"))
            .await
            .expect("router response")
    }

    pub fn sign(&self, body: &Value) -> String {
        sign(
            WEBHOOK_SECRET,
            &serde_json::to_vec(body).expect("serialize callback"),
        )
    }
}

/// Coupon input with no limits, windows or allow-lists.
pub fn coupon_input(code: &str, discount_type: DiscountType, value: i64) -> CreateCouponInput {
    CreateCouponInput {
        code: code.to_string(),
        discount_type,
        value,
        minimum_amount: 0,
        maximum_discount: None,
        usage_limit: None,
        user_limit: None,
        starts_at: None,
        expires_at: None,
        applicable_packages: None,
        applicable_users: None,
        is_active: true,
    }
}

/// Invoice-style callback body for `payment` carrying `status`.
pub fn invoice_callback(payment: &PaymentModel, status: &str) -> Value {
    json!({
        "id": payment.gateway_reference,
        "external_id": payment.correlation_id,
        "status": status,
        "amount": payment.amount,
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
