use serde_json::Value;

use super::status::map_native_status;
use crate::errors::ServiceError;
use crate::models::payment::PaymentStatus;

/// Fields the reconciler needs out of a gateway callback body.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Our correlation id as echoed by the gateway
    pub correlation_id: Option<String>,
    /// The gateway's own id for the payment object
    pub gateway_id: Option<String>,
    /// Status word exactly as the gateway sent it
    pub native_status: Option<String>,
    /// Id of the money movement that settled the payment, if any
    pub transaction_id: Option<String>,
    pub payload: Value,
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

impl Notification {
    /// Reads a callback body. Only JSON objects are accepted.
    pub fn parse(body: &[u8]) -> Result<Self, ServiceError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid callback body: {}", e)))?;
        Self::from_value(payload)
    }

    pub fn from_value(payload: Value) -> Result<Self, ServiceError> {
        if !payload.is_object() {
            return Err(ServiceError::BadRequest(
                "callback body must be a JSON object".to_string(),
            ));
        }

        // e-wallet callbacks nest the charge under `data`
        let nested = payload.get("data").filter(|d| d.is_object());
        let lookup = |key: &str| {
            text(&payload, key).or_else(|| nested.and_then(|data| text(data, key)))
        };

        let correlation_id = lookup("external_id").or_else(|| lookup("reference_id"));
        let gateway_id = lookup("id");

        let native_status = lookup("status").or_else(|| {
            // virtual-account payment callbacks carry no status at all
            let is_va_payment = text(&payload, "payment_id").is_some()
                && text(&payload, "callback_virtual_account_id").is_some();
            is_va_payment.then(|| "PAID".to_string())
        });

        let transaction_id = text(&payload, "payment_id").or_else(|| gateway_id.clone());

        Ok(Self {
            correlation_id,
            gateway_id,
            native_status,
            transaction_id,
            payload,
        })
    }

    pub fn mapped_status(&self) -> PaymentStatus {
        self.native_status
            .as_deref()
            .map_or(PaymentStatus::Pending, map_native_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoice_callback_uses_external_id() {
        let n = Notification::from_value(json!({
            "id": "inv_123",
            "external_id": "corr-1",
            "status": "PAID",
        }))
        .unwrap();
        assert_eq!(n.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(n.gateway_id.as_deref(), Some("inv_123"));
        assert_eq!(n.mapped_status(), PaymentStatus::Settlement);
        assert_eq!(n.transaction_id.as_deref(), Some("inv_123"));
    }

    #[test]
    fn ewallet_callback_is_read_from_data() {
        let n = Notification::from_value(json!({
            "event": "ewallet.capture",
            "data": {
                "id": "ewc_9",
                "reference_id": "corr-2",
                "status": "SUCCEEDED",
            }
        }))
        .unwrap();
        assert_eq!(n.correlation_id.as_deref(), Some("corr-2"));
        assert_eq!(n.gateway_id.as_deref(), Some("ewc_9"));
        assert_eq!(n.mapped_status(), PaymentStatus::Settlement);
    }

    #[test]
    fn virtual_account_payment_without_status_reads_as_paid() {
        let n = Notification::from_value(json!({
            "external_id": "corr-3",
            "payment_id": "va_pay_1",
            "callback_virtual_account_id": "cva_1",
            "amount": 90123,
        }))
        .unwrap();
        assert_eq!(n.native_status.as_deref(), Some("PAID"));
        assert_eq!(n.transaction_id.as_deref(), Some("va_pay_1"));
    }

    #[test]
    fn missing_status_is_pending() {
        let n = Notification::from_value(json!({"external_id": "corr-4"})).unwrap();
        assert_eq!(n.mapped_status(), PaymentStatus::Pending);
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(Notification::parse(b"[1,2,3]").is_err());
        assert!(Notification::parse(b"not json").is_err());
    }
}
