use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;

use crate::errors::ServiceError;
use crate::services::reconciler::ReconcileReport;
use crate::webhooks::SIGNATURE_HEADER;
use crate::{ApiResponse, AppState};

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    params(
        ("x-callback-signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")
    ),
    responses(
        (status = 200, description = "Callback recorded", body = crate::ApiResponse<ReconcileReport>),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "No payment matches the callback", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<ReconcileReport>>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let report = state.services.reconciler.handle(signature, &body).await?;
    Ok(Json(ApiResponse::success(report)))
}
