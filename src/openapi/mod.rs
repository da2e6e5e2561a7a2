use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Invitation Checkout API",
        version = "0.1.0",
        description = r#"
# Invitation Checkout

Checkout settlement for invitation packages: coupon pricing, order lifecycle
and reconciliation of payments against the payment gateway.

## Amounts

All amounts are integers in minor currency units.

## Error Handling

Errors share one body format. Coupon rejections add a machine-readable `code`:

```json
{
  "error": "Unprocessable Entity",
  "message": "Coupon rejected: expired",
  "code": "expired",
  "request_id": "req-abc123",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Gateway callbacks

`POST /api/v1/payments/webhook` must carry `x-callback-signature`, the hex
HMAC-SHA256 of the raw body under the shared webhook secret.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Coupons", description = "Coupon pricing"),
        (name = "Checkout", description = "Order creation and lifecycle"),
        (name = "Payments", description = "Payment attempts and gateway callbacks")
    ),
    paths(
        crate::handlers::coupons::preview_coupon,
        crate::handlers::checkout::start_checkout,
        crate::handlers::checkout::get_order,
        crate::handlers::checkout::void_order,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::get_payment,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::services::coupons::PreviewRequest,
            crate::services::coupons::PreviewResult,
            crate::services::checkout::StartCheckoutRequest,
            crate::services::checkout::OrderView,
            crate::services::payments::CreatePaymentRequest,
            crate::services::payments::CustomerInput,
            crate::services::payments::PaymentCreated,
            crate::services::payments::PaymentView,
            crate::services::reconciler::ReconcileReport,
            crate::services::reconciler::ReconcileOutcome,
            crate::models::order::OrderStatus,
            crate::models::payment::PaymentMethod,
            crate::models::payment::PaymentStatus,
            crate::errors::CouponRejection,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
