//! Applies gateway callbacks to local payment and order state.
//!
//! The reconciler keeps no record of which deliveries it has seen. Replays
//! and out-of-order deliveries are absorbed by the monotonic payment status
//! and by the idempotent ledger operations, all inside one transaction that
//! holds the order row.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{is_unique_violation, CouponRejection, IntegrityViolation, ServiceError};
use crate::models::order::{Model as OrderModel, OrderStatus};
use crate::models::payment::{
    self, merge_envelope, Entity as Payment, Model as PaymentModel, PaymentStatus,
};
use crate::services::coupon_ledger::{Consumption, CouponLedger, UsageClaim};
use crate::services::order_ledger::{OrderLedger, Transition};
use crate::webhooks::{Notification, WebhookVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Payload stored; payment pending or failed, order untouched
    Recorded,
    /// Payload stored but the status it carried would move the payment backwards
    Stale,
    /// The order became paid with this delivery
    Settled,
    /// The order was already paid; nothing besides the payload changed
    AlreadySettled,
    /// Settlement arrived for a void order; payment recorded, order untouched
    RejectedTransition,
    /// Another payment already settled this order; payload stored only
    DuplicateSettlement,
}

impl ReconcileOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileOutcome::Recorded => "recorded",
            ReconcileOutcome::Stale => "stale",
            ReconcileOutcome::Settled => "settled",
            ReconcileOutcome::AlreadySettled => "already_settled",
            ReconcileOutcome::RejectedTransition => "rejected_transition",
            ReconcileOutcome::DuplicateSettlement => "duplicate_settlement",
        }
    }
}

/// What a delivery did, returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    pub payment_id: Uuid,
    pub payment_status: PaymentStatus,
    pub order_state: OrderStatus,
}

#[derive(Clone)]
pub struct WebhookReconciler {
    db: Arc<DatabaseConnection>,
    verifier: WebhookVerifier,
}

impl WebhookReconciler {
    pub fn new(db: Arc<DatabaseConnection>, verifier: WebhookVerifier) -> Self {
        Self { db, verifier }
    }

    /// Verifies, correlates and applies one callback delivery.
    #[instrument(skip(self, signature, body), fields(body_len = body.len()))]
    pub async fn handle(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<ReconcileReport, ServiceError> {
        if let Err(violation) = self.verifier.verify(signature, body) {
            counter!("checkout.webhook.rejected", 1, "reason" => "signature");
            warn!(violation = %violation, "payment callback rejected");
            return Err(violation.into());
        }

        let notification = Notification::parse(body)?;
        let native_status = notification.native_status.clone().unwrap_or_default();

        let Some(found) = self.find_payment(&notification).await? else {
            let key = notification
                .correlation_id
                .clone()
                .or_else(|| notification.gateway_id.clone())
                .unwrap_or_else(|| "<none>".to_string());
            counter!("checkout.webhook.rejected", 1, "reason" => "unknown_correlation");
            warn!(
                correlation_id = %key,
                native_status = %native_status,
                "payment callback matches no payment"
            );
            return Err(IntegrityViolation::UnknownCorrelation(key).into());
        };

        let report = self.apply(&found, &notification).await?;

        counter!("checkout.webhook.outcomes", 1, "outcome" => report.outcome.as_str());
        info!(
            payment_id = %report.payment_id,
            correlation_id = %found.correlation_id,
            native_status = %native_status,
            outcome = report.outcome.as_str(),
            payment_status = %report.payment_status,
            order_state = %report.order_state,
            "payment callback reconciled"
        );
        Ok(report)
    }

    async fn find_payment(
        &self,
        notification: &Notification,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        if let Some(correlation_id) = notification.correlation_id.as_deref() {
            let by_correlation = Payment::find()
                .filter(payment::Column::CorrelationId.eq(correlation_id))
                .one(&*self.db)
                .await?;
            if by_correlation.is_some() {
                return Ok(by_correlation);
            }
        }

        match notification.gateway_id.as_deref() {
            Some(gateway_id) => Ok(Payment::find()
                .filter(payment::Column::GatewayReference.eq(gateway_id))
                .one(&*self.db)
                .await?),
            None => Ok(None),
        }
    }

    /// Applies one delivery while holding the order row, so deliveries for
    /// any payment of the same order are applied one after another.
    async fn apply(
        &self,
        found: &PaymentModel,
        notification: &Notification,
    ) -> Result<ReconcileReport, ServiceError> {
        let payment_id = found.id;
        let txn = self.db.begin().await?;
        OrderLedger::lock(&txn, found.order_id).await?;

        let current = Payment::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;
        let order = OrderLedger::find(&txn, current.order_id).await?;

        let incoming = notification.mapped_status();
        let mut next = if current.payment_status.can_become(incoming) {
            incoming
        } else {
            current.payment_status
        };

        let mut duplicate = false;
        if next == PaymentStatus::Settlement
            && current.payment_status != PaymentStatus::Settlement
            && other_settled_payment(&txn, &current).await?
        {
            next = current.payment_status;
            duplicate = true;
        }

        let envelope = merge_envelope(current.callback_response.as_ref(), &notification.payload);
        let previous_status = current.payment_status;
        let updated = match write_payment(&txn, &current, &envelope, next).await {
            Ok(updated) => updated,
            Err(err) if is_unique_violation(&err) => {
                // settled elsewhere without going through the order lock
                warn!(
                    payment_id = %payment_id,
                    order_id = %order.id,
                    "settled payment index refused status; keeping payload only"
                );
                duplicate = true;
                match write_payment(&txn, &current, &envelope, previous_status).await {
                    Ok(updated) => updated,
                    Err(err) => {
                        txn.rollback().await?;
                        return Err(err.into());
                    }
                }
            }
            Err(err) => {
                txn.rollback().await?;
                return Err(err.into());
            }
        };

        if duplicate {
            let violation = IntegrityViolation::DuplicateSettlement {
                order_id: order.id,
                payment_id,
            };
            error!(
                violation = %violation,
                correlation_id = %updated.correlation_id,
                native_status = ?notification.native_status,
                "settlement refused; order already settled by another payment"
            );
            txn.commit().await?;
            return Ok(report(ReconcileOutcome::DuplicateSettlement, &updated, &order));
        }

        if updated.payment_status != PaymentStatus::Settlement {
            let outcome = if incoming == updated.payment_status {
                ReconcileOutcome::Recorded
            } else {
                debug!(
                    payment_id = %payment_id,
                    from = %previous_status,
                    to = %incoming,
                    "ignoring backwards payment status"
                );
                ReconcileOutcome::Stale
            };
            txn.commit().await?;
            return Ok(report(outcome, &updated, &order));
        }

        let stale = incoming != PaymentStatus::Settlement;
        let result = settle_order(&txn, &updated, &order, notification).await;
        match result {
            Ok((transition, _)) => {
                txn.commit().await?;
                let outcome = match (&transition, stale) {
                    (Transition::Applied(_), _) => ReconcileOutcome::Settled,
                    (Transition::Unchanged(_), true) => ReconcileOutcome::Stale,
                    (Transition::Unchanged(_), false) => ReconcileOutcome::AlreadySettled,
                };
                Ok(report(outcome, &updated, transition.order()))
            }
            Err(ServiceError::Integrity(violation @ IntegrityViolation::IllegalTransition { .. })) => {
                error!(
                    violation = %violation,
                    payment_id = %payment_id,
                    correlation_id = %updated.correlation_id,
                    native_status = ?notification.native_status,
                    "settlement received for a void order; order left untouched"
                );
                counter!("checkout.webhook.integrity_violations", 1);
                txn.commit().await?;
                Ok(report(ReconcileOutcome::RejectedTransition, &updated, &order))
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }
}

/// Stores the merged payload and status in a savepoint, so a refused write
/// leaves the surrounding transaction usable.
async fn write_payment(
    txn: &DatabaseTransaction,
    current: &PaymentModel,
    envelope: &Value,
    status: PaymentStatus,
) -> Result<PaymentModel, DbErr> {
    let savepoint = txn.begin().await?;
    let mut active: payment::ActiveModel = current.clone().into();
    active.callback_response = Set(Some(envelope.clone()));
    active.payment_status = Set(status);
    active.updated_at = Set(Some(Utc::now()));
    match active.update(&savepoint).await {
        Ok(updated) => {
            savepoint.commit().await?;
            Ok(updated)
        }
        Err(err) => {
            savepoint.rollback().await?;
            Err(err)
        }
    }
}

fn report(outcome: ReconcileOutcome, payment: &PaymentModel, order: &OrderModel) -> ReconcileReport {
    ReconcileReport {
        outcome,
        payment_id: payment.id,
        payment_status: payment.payment_status,
        order_state: order.status,
    }
}

async fn other_settled_payment(
    txn: &DatabaseTransaction,
    current: &PaymentModel,
) -> Result<bool, ServiceError> {
    let settled = Payment::find()
        .filter(payment::Column::OrderId.eq(current.order_id))
        .filter(payment::Column::Id.ne(current.id))
        .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Settlement))
        .count(txn)
        .await?;
    Ok(settled > 0)
}

/// Marks the order paid and commits its coupon slot. Both steps are no-ops
/// when a previous delivery already did them.
async fn settle_order(
    txn: &DatabaseTransaction,
    payment: &PaymentModel,
    order: &OrderModel,
    notification: &Notification,
) -> Result<(Transition, Option<Consumption>), ServiceError> {
    let external_id = notification
        .transaction_id
        .clone()
        .or_else(|| payment.gateway_reference.clone());
    let transition = OrderLedger::mark_paid(txn, order.id, external_id).await?;

    let Some(coupon_id) = order.coupon_id else {
        return Ok((transition, None));
    };

    let claim = UsageClaim {
        coupon_id,
        order_id: order.id,
        user_id: order.user_id,
        discount_amount: order.discount_amount,
        order_amount: order.gross_amount(),
    };
    match CouponLedger::consume(txn, claim).await {
        Ok(consumption) => Ok((transition, Some(consumption))),
        Err(ServiceError::CouponRejected(
            reason @ (CouponRejection::UsageLimitReached | CouponRejection::UserLimitReached),
        )) => {
            // the money is in; the order stays paid without a usage row
            counter!("checkout.coupon.overruns", 1);
            error!(
                order_id = %order.id,
                payment_id = %payment.id,
                coupon_id = %coupon_id,
                reason = %reason,
                "coupon slot unavailable at settlement"
            );
            Ok((transition, None))
        }
        Err(err) => Err(err),
    }
}
