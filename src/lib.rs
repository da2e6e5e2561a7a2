//! Invitation checkout settlement core
//!
//! Coupon pricing, the order lifecycle and reconciliation of payment gateway
//! callbacks for an invitation-package storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Versioned API routes, mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .nest("/coupons", handlers::coupons::coupon_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/orders", handlers::checkout::order_routes())
        .nest("/payments", handlers::payments::payment_routes())
}

/// Full application router: health, versioned API, documentation and the
/// request-id and tracing layers.
pub fn app_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let version = env!("CARGO_PKG_VERSION");
    let git = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "git": git,
        "build_time": build_time,
        "service": "invitation-checkout",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.config.environment,
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::errors::{CouponRejection, IntegrityViolation, ServiceError};
    pub use crate::gateway::{PaymentGateway, XenditGateway};
    pub use crate::handlers::AppServices;
    pub use crate::services::discount::DiscountEngine;
    pub use crate::{app_router, ApiResponse, ApiResult, AppState};
}
