use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::gateway::{Customer, GatewayFailure, MethodDetails, PaymentGateway, PaymentRequest};
use crate::models::order::OrderStatus;
use crate::models::payment::{
    self, merge_envelope, Entity as Payment, Model as PaymentModel, PaymentMethod, PaymentStatus,
};
use crate::services::order_ledger::OrderLedger;

const TRANSACTION_TYPE: &str = "order_payment";

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CustomerInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 6, max = 20))]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "order_id": "8f14e45f-ceea-467f-a8f5-3c1f2b1d9a10",
    "payment_method": "virtual_account",
    "amount": 90123,
    "currency": "IDR",
    "bank_code": "BCA",
    "customer": {"name": "Rina Wijaya", "email": "rina@example.com", "phone": "+628123456789"}
}))]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    /// Must equal the order's final price when given
    pub amount: Option<i64>,
    #[validate(custom = "validate_currency_code")]
    pub currency: Option<String>,
    /// Required for virtual_account
    pub bank_code: Option<String>,
    /// Required for ewallet and retail_outlet
    pub channel_code: Option<String>,
    #[validate]
    pub customer: CustomerInput,
}

fn validate_currency_code(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(ValidationError::new("currency"))
    }
}

impl CreatePaymentRequest {
    fn method_details(&self) -> Result<MethodDetails, ServiceError> {
        let required = |value: &Option<String>, field: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_ascii_uppercase())
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "{} is required for {}",
                        field, self.payment_method
                    ))
                })
        };

        Ok(match self.payment_method {
            PaymentMethod::Invoice => MethodDetails::Invoice,
            PaymentMethod::VirtualAccount => MethodDetails::VirtualAccount {
                bank_code: required(&self.bank_code, "bank_code")?,
            },
            PaymentMethod::Ewallet => MethodDetails::Ewallet {
                channel_code: required(&self.channel_code, "channel_code")?,
            },
            PaymentMethod::RetailOutlet => MethodDetails::RetailOutlet {
                channel_code: required(&self.channel_code, "channel_code")?,
            },
        })
    }
}

/// Response to a successful payment creation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentCreated {
    pub payment_id: Uuid,
    pub payment_url: String,
    pub payment_method: PaymentMethod,
    pub correlation_id: String,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_channel: Option<String>,
    pub payment_status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
    pub correlation_id: String,
    pub gateway_reference: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PaymentModel> for PaymentView {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            payment_method: model.payment_method,
            payment_channel: model.payment_channel,
            payment_status: model.payment_status,
            amount: model.amount,
            currency: model.currency,
            correlation_id: model.correlation_id,
            gateway_reference: model.gateway_reference,
            payment_url: model.payment_url,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    default_currency: String,
    public_base_url: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            default_currency: config.default_currency.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn instructions_url(&self, payment_id: Uuid) -> String {
        format!("{}/payments/{}", self.public_base_url, payment_id)
    }

    /// Opens a payment attempt for a pending order and registers it with the gateway.
    ///
    /// The attempt is stored as `pending` before the gateway is called so a
    /// callback can always be matched, even when the outbound call times out.
    /// The order's payment type is only recorded once the gateway accepts.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.payment_method))]
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, ServiceError> {
        request.validate()?;
        let details = request.method_details()?;

        let order = OrderLedger::find(&*self.db, request.order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::ValidationError(format!(
                "Order {} is {} and cannot be paid",
                order.id, order.status
            )));
        }
        if order.is_expired(Utc::now()) {
            return Err(ServiceError::ValidationError(format!(
                "Order {} has expired",
                order.id
            )));
        }

        let amount = order.final_price();
        if let Some(requested) = request.amount {
            if requested != amount {
                return Err(ServiceError::ValidationError(format!(
                    "Amount {} does not match order total {}",
                    requested, amount
                )));
            }
        }

        let currency = request
            .currency
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| self.default_currency.clone());

        let payment_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let txn = self.db.begin().await?;
        OrderLedger::lock(&txn, order.id).await?;
        if OrderLedger::find(&txn, order.id).await?.status != OrderStatus::Pending {
            txn.rollback().await?;
            return Err(ServiceError::ValidationError(format!(
                "Order {} is no longer pending",
                order.id
            )));
        }
        let pending = payment::ActiveModel {
            id: Set(payment_id),
            order_id: Set(order.id),
            payment_method: Set(details.method()),
            payment_channel: Set(details.channel().map(str::to_string)),
            gateway_source: Set(self.gateway.source().to_string()),
            payment_status: Set(PaymentStatus::Pending),
            transaction_type: Set(TRANSACTION_TYPE.to_string()),
            amount: Set(amount),
            currency: Set(currency.clone()),
            correlation_id: Set(correlation_id.clone()),
            gateway_reference: Set(None),
            payment_url: Set(None),
            callback_response: Set(Some(serde_json::json!({
                "correlation_id": correlation_id,
            }))),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        let gateway_request = PaymentRequest {
            correlation_id: correlation_id.clone(),
            amount,
            currency,
            customer: Customer {
                name: request.customer.name.clone(),
                email: request.customer.email.clone(),
                phone: request.customer.phone.clone(),
            },
            description: format!("Invitation order {}", order.id),
            return_url: self.instructions_url(payment_id),
            details,
        };

        match self.gateway.create_payment(&gateway_request).await {
            Ok(created) => {
                let payment_url = created
                    .payment_url
                    .clone()
                    .unwrap_or_else(|| self.instructions_url(payment_id));

                let mut response = created.raw.clone();
                if let Some(fields) = response.as_object_mut() {
                    fields.insert("payment_url".into(), serde_json::json!(payment_url));
                }

                // A callback may have landed while the gateway call was in
                // flight; merge into what is stored now, under the order lock.
                let txn = self.db.begin().await?;
                OrderLedger::lock(&txn, order.id).await?;
                let current = Self::payment_in(&txn, payment_id).await?;
                let envelope = merge_envelope(current.callback_response.as_ref(), &response);
                let mut active: payment::ActiveModel = current.into();
                active.gateway_reference = Set(Some(created.reference.clone()));
                active.payment_url = Set(Some(payment_url.clone()));
                active.callback_response = Set(Some(envelope));
                active.updated_at = Set(Some(Utc::now()));
                let updated = active.update(&txn).await?;
                if !OrderLedger::record_payment_type(&txn, order.id, pending.payment_method).await? {
                    warn!(
                        payment_id = %payment_id,
                        order_id = %order.id,
                        "order no longer pending; payment type not recorded"
                    );
                }
                txn.commit().await?;

                info!(
                    payment_id = %payment_id,
                    gateway_reference = %created.reference,
                    "payment registered with gateway"
                );
                Ok(PaymentCreated {
                    payment_id,
                    payment_url,
                    payment_method: pending.payment_method,
                    correlation_id,
                    payment_status: updated.payment_status,
                })
            }
            Err(failure) => self.record_gateway_failure(order.id, payment_id, failure).await,
        }
    }

    async fn record_gateway_failure(
        &self,
        order_id: Uuid,
        payment_id: Uuid,
        failure: GatewayFailure,
    ) -> Result<PaymentCreated, ServiceError> {
        counter!("checkout.gateway.failures", 1);

        let txn = self.db.begin().await?;
        OrderLedger::lock(&txn, order_id).await?;
        let current = Self::payment_in(&txn, payment_id).await?;
        let envelope = merge_envelope(current.callback_response.as_ref(), &failure.to_envelope());
        // A callback may already have settled this attempt.
        let fail = failure.is_definite() && current.payment_status == PaymentStatus::Pending;

        let mut active: payment::ActiveModel = current.into();
        active.callback_response = Set(Some(envelope));
        active.updated_at = Set(Some(Utc::now()));
        if fail {
            active.payment_status = Set(PaymentStatus::Failed);
        }
        active.update(&txn).await?;
        txn.commit().await?;

        if failure.is_definite() {
            error!(payment_id = %payment_id, error = %failure, "payment gateway refused payment");
            Err(ServiceError::GatewayError(format!(
                "payment {} failed: {}",
                payment_id, failure
            )))
        } else {
            warn!(
                payment_id = %payment_id,
                error = %failure,
                "payment gateway outcome unknown; payment left pending"
            );
            Err(ServiceError::GatewayTimeout(format!(
                "payment {} is pending: {}",
                payment_id, failure
            )))
        }
    }

    async fn payment_in<C>(conn: &C, payment_id: Uuid) -> Result<PaymentModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        Payment::find_by_id(payment_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    async fn get_payment_model(&self, payment_id: Uuid) -> Result<PaymentModel, ServiceError> {
        Self::payment_in(&*self.db, payment_id).await
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentView, ServiceError> {
        self.get_payment_model(payment_id).await.map(PaymentView::from)
    }
}
