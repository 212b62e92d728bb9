//! Payment gateway client.
//!
//! The gateway contract is narrow: create a payment order for an amount in minor
//! units, and verify the HMAC-SHA256 signature the gateway hands the client over
//! `gateway_order_id|gateway_payment_id`.

use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, instrument};
use validator::Validate;

type HmacSha256 = Hmac<Sha256>;

/// Order created on the gateway side.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Proof of payment returned by the gateway checkout widget.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GatewayProof {
    #[serde(alias = "razorpay_order_id")]
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    #[validate(length(min = 1))]
    pub signature: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;

    /// True when `signature` matches the payment identifiers.
    fn verify_signature(&self, proof: &GatewayProof) -> bool;
}

/// Converts a major-unit amount to the gateway's minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .filter(|v| *v > 0)
        .ok_or_else(|| ServiceError::ValidationError(format!("Invalid payment amount {}", amount)))
}

/// Hex HMAC-SHA256 over `order_id|payment_id`.
pub fn compute_signature(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(gateway_payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature check.
pub fn verify_signature(secret: &str, proof: &GatewayProof) -> bool {
    let Ok(provided) = hex::decode(proof.signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(proof.gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(proof.gateway_payment_id.as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Razorpay-style REST gateway.
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: Option<String>,
    key_secret: Option<String>,
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: Option<String>,
        key_secret: Option<String>,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id,
            key_secret,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[instrument(skip(self))]
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let (Some(key_id), Some(key_secret)) = (&self.key_id, &self.key_secret) else {
            return Err(ServiceError::ExternalServiceError(
                "payment gateway credentials are not configured".into(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(key_id, Some(key_secret))
            .json(&CreateOrderRequest {
                amount: amount_minor,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Gateway order request failed");
                ServiceError::ExternalServiceError(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Gateway rejected order creation");
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                status
            )));
        }

        response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("bad gateway response: {}", e)))
    }

    fn verify_signature(&self, proof: &GatewayProof) -> bool {
        match &self.key_secret {
            Some(secret) => verify_signature(secret, proof),
            None => false,
        }
    }
}
