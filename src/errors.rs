use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use sea_orm::SqlErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Simplified error structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "message": "Coupon rejected: usage_limit_reached",
    "code": "usage_limit_reached",
    "request_id": "req-abc123xyz",
    "timestamp": "2026-10-19T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable reason code, present for coupon rejections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Why a coupon cannot be applied to an order context.
///
/// Variants are listed in evaluation order; the first failing check wins.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponRejection {
    CouponNotFound,
    Inactive,
    NotStarted,
    Expired,
    UsageLimitReached,
    UserLimitReached,
    UserNotEligible,
    PackageNotEligible,
    BelowMinimumAmount,
}

impl CouponRejection {
    pub fn code(&self) -> &str {
        self.as_ref()
    }
}

/// Violations that are always rejected and never partially applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum IntegrityViolation {
    #[error("webhook signature missing")]
    MissingSignature,

    #[error("webhook signature mismatch")]
    InvalidSignature,

    #[error("no payment matches correlation id {0}")]
    UnknownCorrelation(String),

    #[error("order {order_id} cannot move from {from} to {to}")]
    IllegalTransition {
        order_id: Uuid,
        from: String,
        to: String,
    },

    #[error("order {order_id} already has a settled payment; refusing to settle payment {payment_id}")]
    DuplicateSettlement { order_id: Uuid, payment_id: Uuid },
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Coupon rejected: {0}")]
    CouponRejected(CouponRejection),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Payment gateway timed out: {0}")]
    GatewayTimeout(String),

    #[error("Integrity violation: {0}")]
    Integrity(IntegrityViolation),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<IntegrityViolation> for ServiceError {
    fn from(violation: IntegrityViolation) -> Self {
        ServiceError::Integrity(violation)
    }
}

impl From<CouponRejection> for ServiceError {
    fn from(rejection: CouponRejection) -> Self {
        ServiceError::CouponRejected(rejection)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::CouponRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Integrity(violation) => match violation {
                IntegrityViolation::MissingSignature | IntegrityViolation::InvalidSignature => {
                    StatusCode::UNAUTHORIZED
                }
                IntegrityViolation::UnknownCorrelation(_) => StatusCode::NOT_FOUND,
                IntegrityViolation::IllegalTransition { .. }
                | IntegrityViolation::DuplicateSettlement { .. } => StatusCode::CONFLICT,
            },
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn reason_code(&self) -> Option<String> {
        match self {
            Self::CouponRejected(rejection) => Some(rejection.code().to_string()),
            _ => None,
        }
    }
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.reason_code(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
