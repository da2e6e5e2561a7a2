//! Order lifecycle: `pending -> paid` or `pending -> void`, nothing else.
//!
//! Transitions are compare-and-set writes guarded on `status = pending`.
//! Repeating a transition that already happened is a no-op, while crossing
//! from one terminal state into the other is rejected.

use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{IntegrityViolation, ServiceError};
use crate::models::order::{self, Entity as Order, Model as OrderModel, OrderStatus};
use crate::models::payment::PaymentMethod;

/// Outcome of a lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(OrderModel),
    /// The order was already in the requested state.
    Unchanged(OrderModel),
}

impl Transition {
    pub fn order(&self) -> &OrderModel {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> OrderModel {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

pub struct OrderLedger;

impl OrderLedger {
    pub async fn find<C>(conn: &C, order_id: Uuid) -> Result<OrderModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        Order::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Holds the order row until the surrounding transaction ends.
    ///
    /// Must be the first statement of the transaction. It is a
    /// self-assignment `UPDATE` rather than `SELECT ... FOR UPDATE`: SQLite
    /// has no row locks and drops `FOR UPDATE`, but an opening write makes it
    /// queue on the database write lock instead of failing the transaction.
    pub async fn lock<C>(conn: &C, order_id: Uuid) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::col(order::Column::Status).into())
            .filter(order::Column::Id.eq(order_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        Ok(())
    }

    #[instrument(skip(conn))]
    pub async fn mark_paid<C>(
        conn: &C,
        order_id: Uuid,
        external_transaction_id: Option<String>,
    ) -> Result<Transition, ServiceError>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(order::Column::PaidAt, Expr::value(now))
            .col_expr(
                order::Column::ExternalTransactionId,
                Expr::value(external_transaction_id),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::IsVoid.eq(false))
            .exec(conn)
            .await?;

        Self::settle_transition(conn, order_id, result.rows_affected, OrderStatus::Paid).await
    }

    #[instrument(skip(conn))]
    pub async fn mark_void<C>(conn: &C, order_id: Uuid) -> Result<Transition, ServiceError>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Void))
            .col_expr(order::Column::IsVoid, Expr::value(true))
            .col_expr(order::Column::VoidAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::IsPaid.eq(false))
            .exec(conn)
            .await?;

        Self::settle_transition(conn, order_id, result.rows_affected, OrderStatus::Void).await
    }

    /// Records the chosen payment method while the order is still pending.
    /// Returns false when the order has already left `pending`.
    pub async fn record_payment_type<C>(
        conn: &C,
        order_id: Uuid,
        method: PaymentMethod,
    ) -> Result<bool, ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = Order::update_many()
            .col_expr(order::Column::PaymentType, Expr::value(method))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn settle_transition<C>(
        conn: &C,
        order_id: Uuid,
        rows_affected: u64,
        target: OrderStatus,
    ) -> Result<Transition, ServiceError>
    where
        C: ConnectionTrait,
    {
        let current = Self::find(conn, order_id).await?;

        if rows_affected > 0 {
            info!(order_id = %order_id, status = %target, "order transitioned");
            return Ok(Transition::Applied(current));
        }

        if current.status == target {
            return Ok(Transition::Unchanged(current));
        }

        let violation = IntegrityViolation::IllegalTransition {
            order_id,
            from: current.status.to_string(),
            to: target.to_string(),
        };
        warn!(
            order_id = %order_id,
            from = %current.status,
            to = %target,
            "rejected terminal-state transition"
        );
        Err(violation.into())
    }
}
