use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{OrderView, StartCheckoutRequest};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Open a pending order for a package, optionally with a coupon
#[utoipa::path(
    post,
    path = "/api/v1/checkout/orders",
    request_body = StartCheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<OrderView>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Package not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Coupon rejected", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderView>>), ServiceError> {
    let order = state.services.checkout.start_checkout(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderView::from(order))),
    ))
}

/// Get order by ID
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<OrderView>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let order = state.services.checkout.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(OrderView::from(order))))
}

/// Cancel a pending order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/void",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order is void", body = crate::ApiResponse<OrderView>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn void_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let transition = state.services.checkout.void_order(order_id).await?;
    Ok(Json(ApiResponse::success(OrderView::from(
        transition.into_order(),
    ))))
}

/// Checkout routes
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/orders", post(start_checkout))
}

/// Order routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_order))
        .route("/:id/void", post(void_order))
}
