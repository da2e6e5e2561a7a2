use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::coupons::{PreviewRequest, PreviewResult};
use crate::ApiResponse;
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};

/// Price a coupon against an order context without consuming it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/preview",
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Coupon verdict and priced discount", body = crate::ApiResponse<PreviewResult>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn preview_coupon(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<ApiResponse<PreviewResult>>, ServiceError> {
    let result = state.services.coupons.preview(request).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Coupon routes
pub fn coupon_routes() -> Router<AppState> {
    Router::new().route("/preview", post(preview_coupon))
}
