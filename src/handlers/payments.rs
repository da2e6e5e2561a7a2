use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{CreatePaymentRequest, PaymentCreated, PaymentView};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Start a payment attempt for a pending order
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment created with the gateway", body = crate::ApiResponse<PaymentCreated>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway refused the payment", body = crate::errors::ErrorResponse),
        (status = 504, description = "Gateway outcome unknown; payment left pending", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentCreated>>), ServiceError> {
    let created = state.services.payments.create_payment(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Get payment by ID
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment details", body = crate::ApiResponse<PaymentView>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentView>>, ServiceError> {
    let payment = state.services.payments.get_payment(payment_id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/webhook", post(super::payment_webhooks::payment_webhook))
        .route("/:id", get(get_payment))
}
