//! Server-side record of gateway payment intents.
//!
//! The gateway signature only proves that some payment happened for a gateway
//! order. What that payment is worth, who made it and what it may pay for comes
//! from the intent recorded here when the gateway order was created. Every
//! gateway payment id is honoured once across orders, wallet top-ups and intents.

use crate::{
    entities::{
        commerce::{wallet_transaction, WalletTransaction},
        order::{self, Entity as Order},
        payment_intent::{self, Entity as PaymentIntent, Model as PaymentIntentModel},
        IntentPurpose,
    },
    errors::ServiceError,
    services::payment_gateway::{to_minor_units, GatewayOrder, GatewayProof, PaymentGateway},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    SqlErr,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

const ALREADY_USED: &str = "This payment has already been used";

/// What the client needs to open the gateway checkout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayIntent {
    pub gateway_order_id: String,
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
}

/// Creates a gateway order for `amount` and records it as an open intent.
pub async fn create_intent<C: ConnectionTrait>(
    conn: &C,
    gateway: &dyn PaymentGateway,
    user_id: Uuid,
    purpose: IntentPurpose,
    amount: Decimal,
    currency: &str,
) -> Result<GatewayIntent, ServiceError> {
    let amount_minor = to_minor_units(amount)?;
    let receipt = format!("rcpt_{}", Uuid::new_v4().simple());
    let GatewayOrder { id, .. } = gateway.create_order(amount_minor, currency, &receipt).await?;

    payment_intent::ActiveModel {
        id: Set(Uuid::new_v4()),
        gateway_order_id: Set(id.clone()),
        user_id: Set(user_id),
        purpose: Set(purpose),
        amount: Set(amount),
        currency: Set(currency.to_string()),
        gateway_payment_id: Set(None),
        order_id: Set(None),
        consumed_at: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    info!(%user_id, gateway_order_id = %id, %amount, %purpose, "Created gateway payment intent");
    Ok(GatewayIntent {
        gateway_order_id: id,
        amount,
        amount_minor,
        currency: currency.to_string(),
    })
}

/// Finds the open intent a verified proof pays for.
///
/// The intent must belong to `user_id`, serve `purpose` and, when
/// `expected_amount` is given, be for exactly that amount. Writes nothing.
pub async fn find_open<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    purpose: IntentPurpose,
    proof: &GatewayProof,
    expected_amount: Option<Decimal>,
) -> Result<PaymentIntentModel, ServiceError> {
    let intent = PaymentIntent::find()
        .filter(payment_intent::Column::GatewayOrderId.eq(proof.gateway_order_id.as_str()))
        .one(conn)
        .await?
        .filter(|i| i.user_id == user_id && i.purpose == purpose)
        .ok_or_else(|| {
            warn!(gateway_order_id = %proof.gateway_order_id, %purpose, "Payment without a matching intent");
            ServiceError::payment_verification("Payment does not match this checkout")
        })?;

    if !intent.is_open() {
        counter!("payment_replays_total", 1);
        return Err(ServiceError::Conflict(ALREADY_USED.into()));
    }
    ensure_payment_unused(conn, &proof.gateway_payment_id).await?;

    if let Some(expected) = expected_amount {
        if intent.amount != expected {
            warn!(
                gateway_order_id = %intent.gateway_order_id,
                paid = %intent.amount,
                %expected,
                "Payment amount does not match order total"
            );
            return Err(ServiceError::payment_verification(format!(
                "Payment of {} does not cover the order total of {}",
                intent.amount.normalize(),
                expected.normalize()
            )));
        }
    }
    Ok(intent)
}

/// Fails with `Conflict` if the gateway payment id has paid for anything already.
pub async fn ensure_payment_unused<C: ConnectionTrait>(
    conn: &C,
    gateway_payment_id: &str,
) -> Result<(), ServiceError> {
    let on_order = Order::find()
        .filter(order::Column::GatewayPaymentId.eq(gateway_payment_id))
        .one(conn)
        .await?
        .is_some();
    let on_intent = PaymentIntent::find()
        .filter(payment_intent::Column::GatewayPaymentId.eq(gateway_payment_id))
        .one(conn)
        .await?
        .is_some();
    let on_ledger = WalletTransaction::find()
        .filter(wallet_transaction::Column::ExternalTransactionId.eq(gateway_payment_id))
        .one(conn)
        .await?
        .is_some();

    if on_order || on_intent || on_ledger {
        counter!("payment_replays_total", 1);
        warn!(%gateway_payment_id, "Gateway payment replayed");
        return Err(ServiceError::Conflict(ALREADY_USED.into()));
    }
    Ok(())
}

/// Marks the intent behind `proof` as consumed by this payment.
///
/// Guarded on the intent still being open, so concurrent uses of one payment
/// let exactly one through.
pub async fn consume<C: ConnectionTrait>(
    conn: &C,
    proof: &GatewayProof,
    order_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    let result = PaymentIntent::update_many()
        .col_expr(
            payment_intent::Column::GatewayPaymentId,
            Expr::value(proof.gateway_payment_id.clone()),
        )
        .col_expr(payment_intent::Column::OrderId, Expr::value(order_id))
        .col_expr(payment_intent::Column::ConsumedAt, Expr::value(Utc::now()))
        .filter(payment_intent::Column::GatewayOrderId.eq(proof.gateway_order_id.as_str()))
        .filter(payment_intent::Column::ConsumedAt.is_null())
        .exec(conn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(ALREADY_USED.into()),
            _ => ServiceError::from(e),
        })?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(ALREADY_USED.into()));
    }
    Ok(())
}
