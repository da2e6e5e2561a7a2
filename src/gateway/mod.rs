//! Outbound payment gateway.
//!
//! [`PaymentGateway`] hides the gateway's per-method endpoints behind one call.
//! Callers get back either the gateway's identifiers for the new payment or a
//! [`GatewayFailure`] that says whether the payment definitely does not exist
//! on the gateway side.

pub mod xendit;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::payment::PaymentMethod;

pub use xendit::XenditGateway;

/// Payer details forwarded to the gateway.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Method-specific part of a payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodDetails {
    Invoice,
    VirtualAccount { bank_code: String },
    Ewallet { channel_code: String },
    RetailOutlet { channel_code: String },
}

impl MethodDetails {
    pub fn method(&self) -> PaymentMethod {
        match self {
            MethodDetails::Invoice => PaymentMethod::Invoice,
            MethodDetails::VirtualAccount { .. } => PaymentMethod::VirtualAccount,
            MethodDetails::Ewallet { .. } => PaymentMethod::Ewallet,
            MethodDetails::RetailOutlet { .. } => PaymentMethod::RetailOutlet,
        }
    }

    /// Bank or channel code, when the method has one.
    pub fn channel(&self) -> Option<&str> {
        match self {
            MethodDetails::Invoice => None,
            MethodDetails::VirtualAccount { bank_code } => Some(bank_code),
            MethodDetails::Ewallet { channel_code } | MethodDetails::RetailOutlet { channel_code } => {
                Some(channel_code)
            }
        }
    }
}

/// Common base of every payment creation call.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Our id for this attempt; the gateway echoes it back in callbacks
    pub correlation_id: String,
    pub amount: i64,
    pub currency: String,
    pub customer: Customer,
    pub description: String,
    /// Where the guest lands after paying on a hosted page
    pub return_url: String,
    pub details: MethodDetails,
}

/// A payment the gateway accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPayment {
    /// Gateway-issued id
    pub reference: String,
    /// Hosted payment page, for methods that have one
    pub payment_url: Option<String>,
    /// Full response body, kept for the callback envelope
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayFailure {
    /// The gateway answered and refused the request.
    #[error("gateway rejected the request with status {status}")]
    Rejected {
        status: u16,
        body: serde_json::Value,
    },

    /// No connection was ever established.
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    #[error("gateway did not answer in time: {0}")]
    Timeout(String),

    /// The request may have reached the gateway but the outcome is unknown.
    #[error("gateway outcome unknown: {0}")]
    Ambiguous(String),
}

impl GatewayFailure {
    /// True when the gateway certainly holds no payment for this request.
    pub fn is_definite(&self) -> bool {
        matches!(
            self,
            GatewayFailure::Rejected { .. } | GatewayFailure::Unreachable(_)
        )
    }

    /// Details worth keeping on the payment record.
    pub fn to_envelope(&self) -> serde_json::Value {
        let mut error = serde_json::json!({ "message": self.to_string() });
        if let GatewayFailure::Rejected { status, body } = self {
            error["status"] = serde_json::json!(status);
            error["body"] = body.clone();
        }
        serde_json::json!({ "gateway_error": error })
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name stored in `payments.gateway_source`.
    fn source(&self) -> &'static str;

    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GatewayPayment, GatewayFailure>;
}
