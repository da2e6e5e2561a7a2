use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{GatewayFailure, GatewayPayment, MethodDetails, PaymentGateway, PaymentRequest};
use crate::errors::ServiceError;

const SOURCE: &str = "xendit";

/// HTTP client for the Xendit payments API.
#[derive(Clone)]
pub struct XenditGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    invoice_duration_secs: u64,
}

impl XenditGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
        invoice_duration_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
            invoice_duration_secs,
        })
    }

    fn endpoint(&self, details: &MethodDetails) -> String {
        let path = match details {
            MethodDetails::Invoice => "/v2/invoices",
            MethodDetails::VirtualAccount { .. } => "/callback_virtual_accounts",
            MethodDetails::Ewallet { .. } => "/ewallets/charges",
            MethodDetails::RetailOutlet { .. } => "/fixed_payment_code",
        };
        format!("{}{}", self.base_url, path)
    }

    /// Builds the method-specific body around the shared request fields.
    pub fn build_payload(&self, request: &PaymentRequest) -> Value {
        let customer = &request.customer;
        match &request.details {
            MethodDetails::Invoice => {
                let mut body = json!({
                    "external_id": request.correlation_id,
                    "amount": request.amount,
                    "currency": request.currency,
                    "description": request.description,
                    "invoice_duration": self.invoice_duration_secs,
                    "success_redirect_url": request.return_url,
                    "customer": {
                        "given_names": customer.name,
                    },
                });
                if let Some(email) = &customer.email {
                    body["payer_email"] = json!(email);
                    body["customer"]["email"] = json!(email);
                }
                if let Some(phone) = &customer.phone {
                    body["customer"]["mobile_number"] = json!(phone);
                }
                body
            }
            MethodDetails::VirtualAccount { bank_code } => json!({
                "external_id": request.correlation_id,
                "bank_code": bank_code,
                "name": customer.name,
                "expected_amount": request.amount,
                "currency": request.currency,
                "is_closed": true,
                "is_single_use": true,
            }),
            MethodDetails::Ewallet { channel_code } => {
                let mut properties = json!({
                    "success_redirect_url": request.return_url,
                });
                if let Some(phone) = &customer.phone {
                    properties["mobile_number"] = json!(phone);
                }
                json!({
                    "reference_id": request.correlation_id,
                    "currency": request.currency,
                    "amount": request.amount,
                    "checkout_method": "ONE_TIME_PAYMENT",
                    "channel_code": channel_code,
                    "channel_properties": properties,
                    "metadata": { "description": request.description },
                })
            }
            MethodDetails::RetailOutlet { channel_code } => json!({
                "external_id": request.correlation_id,
                "retail_outlet_name": channel_code,
                "name": customer.name,
                "expected_amount": request.amount,
                "is_single_use": true,
            }),
        }
    }
}

/// Picks the guest-facing URL out of a creation response.
fn hosted_url(details: &MethodDetails, body: &Value) -> Option<String> {
    let pick = |pointer: &str| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    match details {
        MethodDetails::Invoice => pick("/invoice_url"),
        MethodDetails::Ewallet { .. } => pick("/actions/desktop_web_checkout_url")
            .or_else(|| pick("/actions/mobile_web_checkout_url"))
            .or_else(|| pick("/actions/mobile_deeplink_checkout_url")),
        MethodDetails::VirtualAccount { .. } | MethodDetails::RetailOutlet { .. } => None,
    }
}

fn classify_transport_error(err: reqwest::Error) -> GatewayFailure {
    if err.is_timeout() {
        GatewayFailure::Timeout(err.to_string())
    } else if err.is_connect() {
        GatewayFailure::Unreachable(err.to_string())
    } else {
        GatewayFailure::Ambiguous(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for XenditGateway {
    fn source(&self) -> &'static str {
        SOURCE
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id, method = %request.details.method()))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GatewayPayment, GatewayFailure> {
        let url = self.endpoint(&request.details);
        let payload = self.build_payload(request);
        debug!(url = %url, "calling payment gateway");

        let response = self
            .client
            .post(&url)
            .basic_auth(self.secret_key.as_deref().unwrap_or_default(), Some(""))
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));
            warn!(status = status.as_u16(), "payment gateway rejected request");
            return Err(GatewayFailure::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            GatewayFailure::Ambiguous(format!("unreadable success response: {}", e))
        })?;

        let reference = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayFailure::Ambiguous("success response without id".into()))?;

        Ok(GatewayPayment {
            payment_url: hosted_url(&request.details, &body),
            reference,
            raw: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Customer;

    fn gateway() -> XenditGateway {
        XenditGateway::new(
            "https://gateway.test/",
            Some("xnd_test".into()),
            Duration::from_secs(5),
            3600,
        )
        .unwrap()
    }

    fn request(details: MethodDetails) -> PaymentRequest {
        PaymentRequest {
            correlation_id: "corr-1".into(),
            amount: 90_123,
            currency: "IDR".into(),
            customer: Customer {
                name: "Rina".into(),
                email: Some("rina@example.com".into()),
                phone: Some("+628123".into()),
            },
            description: "Invitation package".into(),
            return_url: "https://invite.test/payments/1".into(),
            details,
        }
    }

    #[test]
    fn invoice_payload_carries_external_id_and_payer() {
        let payload = gateway().build_payload(&request(MethodDetails::Invoice));
        assert_eq!(payload["external_id"], "corr-1");
        assert_eq!(payload["amount"], 90_123);
        assert_eq!(payload["payer_email"], "rina@example.com");
        assert_eq!(payload["invoice_duration"], 3600);
    }

    #[test]
    fn ewallet_payload_uses_reference_id() {
        let payload = gateway().build_payload(&request(MethodDetails::Ewallet {
            channel_code: "ID_OVO".into(),
        }));
        assert_eq!(payload["reference_id"], "corr-1");
        assert_eq!(payload["channel_code"], "ID_OVO");
        assert_eq!(payload["channel_properties"]["mobile_number"], "+628123");
        assert!(payload.get("external_id").is_none());
    }

    #[test]
    fn virtual_account_payload_is_closed_amount() {
        let payload = gateway().build_payload(&request(MethodDetails::VirtualAccount {
            bank_code: "BNI".into(),
        }));
        assert_eq!(payload["bank_code"], "BNI");
        assert_eq!(payload["expected_amount"], 90_123);
        assert_eq!(payload["is_closed"], true);
    }

    #[test]
    fn endpoints_follow_method() {
        let gw = gateway();
        assert_eq!(
            gw.endpoint(&MethodDetails::Invoice),
            "https://gateway.test/v2/invoices"
        );
        assert_eq!(
            gw.endpoint(&MethodDetails::RetailOutlet {
                channel_code: "ALFAMART".into()
            }),
            "https://gateway.test/fixed_payment_code"
        );
    }

    #[test]
    fn ewallet_url_prefers_desktop_checkout() {
        let body = json!({"actions": {
            "desktop_web_checkout_url": null,
            "mobile_web_checkout_url": "https://m.ewallet/pay"
        }});
        assert_eq!(
            hosted_url(
                &MethodDetails::Ewallet {
                    channel_code: "ID_DANA".into()
                },
                &body
            ),
            Some("https://m.ewallet/pay".into())
        );
    }
}
