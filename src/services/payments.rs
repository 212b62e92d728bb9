use crate::{
    config::CommercePolicy,
    entities::{commerce::LedgerSource, IntentPurpose, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::{
        payment_gateway::{GatewayProof, PaymentGateway},
        payment_intents,
        wallet::{LedgerEntry, WalletService},
    },
};
use rust_decimal::Decimal;
use sea_orm::ConnectionTrait;
use tracing::{info, warn};
use uuid::Uuid;

/// How an order is being paid for.
///
/// Placement and retry both drive payment through `authorize` before anything is
/// written and `on_order_confirmed` once the order row exists, inside the same
/// transaction.
#[derive(Debug, Clone)]
pub enum Payment {
    Cod,
    Wallet,
    Gateway {
        method: PaymentMethod,
        proof: GatewayProof,
    },
}

impl Payment {
    pub fn from_request(
        method: PaymentMethod,
        proof: Option<GatewayProof>,
    ) -> Result<Self, ServiceError> {
        if method.is_gateway() {
            let proof = proof.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Payment details are required for {} payments",
                    method
                ))
            })?;
            return Ok(Payment::Gateway { method, proof });
        }
        match method {
            PaymentMethod::Cod => Ok(Payment::Cod),
            PaymentMethod::Wallet => Ok(Payment::Wallet),
            other => Err(ServiceError::ValidationError(format!(
                "Unsupported payment method {}",
                other
            ))),
        }
    }

    pub fn method(&self) -> PaymentMethod {
        match self {
            Payment::Cod => PaymentMethod::Cod,
            Payment::Wallet => PaymentMethod::Wallet,
            Payment::Gateway { method, .. } => *method,
        }
    }

    /// Payment status of a confirmed order. Cash is collected on delivery.
    pub fn confirmed_status(&self) -> PaymentStatus {
        match self {
            Payment::Cod => PaymentStatus::Pending,
            Payment::Wallet | Payment::Gateway { .. } => PaymentStatus::Completed,
        }
    }

    pub fn gateway_ids(&self) -> (Option<String>, Option<String>) {
        match self {
            Payment::Gateway { proof, .. } => (
                Some(proof.gateway_order_id.clone()),
                Some(proof.gateway_payment_id.clone()),
            ),
            _ => (None, None),
        }
    }

    /// Checks that `amount` can be paid this way. Writes nothing.
    ///
    /// A gateway proof must carry a valid signature and pay for an open order
    /// intent of this user for exactly `amount`.
    pub async fn authorize<C: ConnectionTrait>(
        &self,
        conn: &C,
        gateway: &dyn PaymentGateway,
        policy: &CommercePolicy,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        match self {
            Payment::Cod => {
                if amount > policy.cod_limit {
                    return Err(ServiceError::PolicyViolation(format!(
                        "Cash on delivery is not available for orders above {}",
                        policy.cod_limit.normalize()
                    )));
                }
            }
            Payment::Wallet => {
                let balance = WalletService::balance(conn, user_id).await?;
                if balance < amount {
                    return Err(ServiceError::InsufficientWalletBalance(format!(
                        "Wallet balance {} is less than the order total {}",
                        balance.normalize(),
                        amount.normalize()
                    )));
                }
            }
            Payment::Gateway { proof, .. } => {
                if !gateway.verify_signature(proof) {
                    warn!(gateway_order_id = %proof.gateway_order_id, "Payment signature mismatch");
                    return Err(ServiceError::payment_verification(
                        "Payment verification failed",
                    ));
                }
                payment_intents::find_open(conn, user_id, IntentPurpose::Order, proof, Some(amount))
                    .await?;
            }
        }
        Ok(())
    }

    /// Settles the payment once the order row is written.
    pub async fn on_order_confirmed<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        order_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        match self {
            Payment::Wallet => {
                WalletService::debit(
                    conn,
                    user_id,
                    LedgerEntry {
                        source: LedgerSource::OrderPayment,
                        amount,
                        order_id: Some(order_id),
                        payment_method: Some(PaymentMethod::Wallet.to_string()),
                        external_transaction_id: None,
                        description: format!("Payment for order {}", order_number),
                    },
                )
                .await?;
                info!(%order_number, %amount, "Debited wallet for order");
            }
            Payment::Gateway { proof, .. } => {
                payment_intents::consume(conn, proof, Some(order_id)).await?;
            }
            Payment::Cod => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn proof() -> GatewayProof {
        GatewayProof {
            gateway_order_id: "order_1".into(),
            gateway_payment_id: "pay_1".into(),
            signature: "00".into(),
        }
    }

    #[test]
    fn gateway_methods_need_proof() {
        assert_matches!(
            Payment::from_request(PaymentMethod::Upi, None),
            Err(ServiceError::ValidationError(_))
        );
        let payment = Payment::from_request(PaymentMethod::NetBanking, Some(proof())).unwrap();
        assert_eq!(payment.method(), PaymentMethod::NetBanking);
        assert_eq!(payment.confirmed_status(), PaymentStatus::Completed);
        assert_eq!(
            payment.gateway_ids(),
            (Some("order_1".to_string()), Some("pay_1".to_string()))
        );
    }

    #[test]
    fn cod_stays_pending_and_ignores_proof() {
        let payment = Payment::from_request(PaymentMethod::Cod, Some(proof())).unwrap();
        assert_matches!(payment, Payment::Cod);
        assert_eq!(payment.confirmed_status(), PaymentStatus::Pending);
        assert_eq!(payment.gateway_ids(), (None, None));
    }
}
