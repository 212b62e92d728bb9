use crate::{
    config::CommercePolicy,
    entities::IntentPurpose,
    errors::ServiceError,
    services::{
        commerce::{
            cart_service::CartService,
            catalog::resolve_line,
            coupon_service::{CouponEvaluation, CouponService},
            pricing_service::line_subtotal,
        },
        payment_gateway::PaymentGateway,
        payment_intents::{self, GatewayIntent},
    },
};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Checkout validator.
///
/// Re-verifies every cart line right before payment and partitions it into what
/// can be ordered now and what stays behind. The result is advisory; placement
/// re-validates everything inside its own transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    coupons: CouponService,
    gateway: Arc<dyn PaymentGateway>,
    policy: CommercePolicy,
    currency: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub stock: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub orderable_items: Vec<CheckoutLine>,
    pub order_total: Decimal,
    pub delivery_fee: Decimal,
    pub final_total: Decimal,
    pub unavailable_items: Vec<CheckoutLine>,
    pub remaining_total: Decimal,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponPreviewInput {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponPreview {
    pub coupon_id: Uuid,
    pub order_total: Decimal,
    pub delivery_fee: Decimal,
    pub evaluation: CouponEvaluation,
    pub payable: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayIntentInput {
    pub coupon_id: Option<Uuid>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        coupons: CouponService,
        gateway: Arc<dyn PaymentGateway>,
        policy: CommercePolicy,
        currency: String,
    ) -> Self {
        Self {
            db,
            coupons,
            gateway,
            policy,
            currency,
        }
    }

    /// Partitions the cart into orderable and unavailable lines.
    ///
    /// Out-of-stock lines stay in the cart with their requested quantity; partly
    /// stocked lines are split into an orderable part and a shortfall.
    #[instrument(skip(self))]
    pub async fn validate(&self, user_id: Uuid) -> Result<CheckoutSummary, ServiceError> {
        let db = &*self.db;
        let cart = CartService::get_or_create_cart(db, user_id).await?;
        let items = CartService::cart_items(db, cart.id).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError("Your cart is empty".into()));
        }

        let mut orderable = Vec::new();
        let mut unavailable = Vec::new();
        let mut issues = Vec::new();

        for item in items.iter().filter(|i| i.quantity > 0) {
            let catalog = match resolve_line(db, item.product_id, item.variant_id).await? {
                Ok(catalog) => catalog,
                Err(reason) => {
                    issues.push(format!("An item in your cart is unavailable: {}", reason));
                    continue;
                }
            };

            let name = catalog.display_name();
            let unit_price = catalog.price().unit_price;
            let stock = catalog.variant.stock.max(0);
            let line = |quantity: i32| CheckoutLine {
                product_id: item.product_id,
                variant_id: item.variant_id,
                name: name.clone(),
                quantity,
                unit_price,
                subtotal: line_subtotal(unit_price, quantity),
                stock,
            };

            if stock == 0 {
                issues.push(format!("{} is out of stock", name));
                unavailable.push(line(item.quantity));
            } else if stock < item.quantity {
                issues.push(format!(
                    "Only {} of {} requested units of {} are available",
                    stock, item.quantity, name
                ));
                orderable.push(line(stock));
                unavailable.push(line(item.quantity - stock));
            } else {
                orderable.push(line(item.quantity));
            }
        }

        if orderable.is_empty() {
            return Err(ServiceError::InsufficientStock(
                "None of the items in your cart are available right now".into(),
            ));
        }

        let order_total: Decimal = orderable.iter().map(|l| l.subtotal).sum();
        let delivery_fee = self.policy.delivery_fee_for(order_total);
        let remaining_total = unavailable.iter().map(|l| l.subtotal).sum();

        Ok(CheckoutSummary {
            orderable_items: orderable,
            order_total,
            delivery_fee,
            final_total: order_total + delivery_fee,
            unavailable_items: unavailable,
            remaining_total,
            issues,
        })
    }

    /// Shows what a coupon would take off the current orderable total.
    #[instrument(skip(self, input))]
    pub async fn preview_coupon(
        &self,
        user_id: Uuid,
        input: CouponPreviewInput,
    ) -> Result<CouponPreview, ServiceError> {
        let summary = self.validate(user_id).await?;
        let coupon = self.coupons.find_by_code(&*self.db, &input.code).await?;
        let evaluation = self
            .coupons
            .evaluate(&*self.db, &coupon, user_id, summary.order_total)
            .await?;

        Ok(CouponPreview {
            coupon_id: coupon.id,
            order_total: summary.order_total,
            delivery_fee: summary.delivery_fee,
            payable: summary.final_total - evaluation.discount,
            evaluation,
        })
    }

    /// Creates a gateway payment intent for the current payable amount.
    ///
    /// A gateway payment for placement is only accepted against this intent and
    /// only for the amount recorded here.
    #[instrument(skip(self, input))]
    pub async fn create_gateway_intent(
        &self,
        user_id: Uuid,
        input: GatewayIntentInput,
    ) -> Result<GatewayIntent, ServiceError> {
        let summary = self.validate(user_id).await?;

        let discount = match input.coupon_id {
            Some(coupon_id) => {
                let coupon = self.coupons.find_by_id(&*self.db, coupon_id).await?;
                self.coupons
                    .evaluate(&*self.db, &coupon, user_id, summary.order_total)
                    .await?
                    .discount
            }
            None => Decimal::ZERO,
        };

        let amount = summary.final_total - discount;
        payment_intents::create_intent(
            &*self.db,
            &*self.gateway,
            user_id,
            IntentPurpose::Order,
            amount,
            &self.currency,
        )
        .await
    }
}
