use crate::{
    config::CommercePolicy,
    db::with_transaction,
    entities::{
        commerce::{address, Address, AddressSnapshot, AppliedCoupon, ProductVariant},
        order::{self, Entity as Order, Model as OrderModel},
        order_item::{self, Model as OrderItemModel},
        ItemStatus, OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            cart_service::CartService,
            catalog::{resolve_line, CatalogLine, LineRejection},
            coupon_service::{split_discount, CouponService},
            prescription_service::PrescriptionService,
            pricing_service::{line_subtotal, ResolvedPrice},
        },
        inventory::{decrement_stock, shrink_cart, CartDeduction},
        payment_gateway::{GatewayProof, PaymentGateway},
        payments::Payment,
    },
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const ORDER_NUMBER_ATTEMPTS: u64 = 5;

/// Order placement engine.
///
/// Turns the orderable part of a cart into a confirmed order. Everything from the
/// stock re-check to the cart shrink runs in one transaction; a failure at any
/// step leaves stock, wallet, coupon usage and cart untouched.
///
/// Declined gateway payments are not lost: the priced order is recorded as a
/// `pending`/`failed` shell that the retry engine can later confirm.
#[derive(Clone)]
pub struct OrderPlacementService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    coupons: CouponService,
    prescriptions: PrescriptionService,
    gateway: Arc<dyn PaymentGateway>,
    policy: CommercePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderedItemInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderInput {
    pub address_id: Uuid,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, message = "Select at least one item to order"))]
    pub ordered_items: Vec<OrderedItemInput>,
    #[serde(default)]
    pub coupon_id: Option<Uuid>,
    #[serde(flatten)]
    pub payment: Option<GatewayProof>,
}

impl PlaceOrderInput {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for item in &self.ordered_items {
            item.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOrderInput {
    #[serde(flatten)]
    pub order: PlaceOrderInput,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What the shopper sees after placement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    /// Human-readable order number
    pub order_id: String,
    pub id: Uuid,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub item_count: usize,
    pub estimated_delivery: DateTime<Utc>,
}

impl PlacedOrder {
    pub(crate) fn from_order(order: &OrderModel, item_count: usize) -> Self {
        Self {
            order_id: order.order_number.clone(),
            id: order.id,
            order_status: order.order_status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            item_count,
            estimated_delivery: order.estimated_delivery,
        }
    }
}

/// A requested line priced against the live catalog.
#[derive(Debug, Clone)]
pub(crate) struct PricedLine {
    pub catalog: CatalogLine,
    pub quantity: i32,
    pub price: ResolvedPrice,
    pub total_price: Decimal,
}

#[derive(Debug, Clone)]
pub(crate) struct PricedOrder {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub discount: Decimal,
    pub coupon: Option<AppliedCoupon>,
    pub total_amount: Decimal,
}

/// Inventory effects of a confirmed order line.
#[derive(Debug, Clone)]
pub(crate) struct ConfirmedLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub name: String,
    pub requires_prescription: bool,
}

impl From<&OrderItemModel> for ConfirmedLine {
    fn from(item: &OrderItemModel) -> Self {
        let snapshot = item.snapshot();
        Self {
            product_id: item.product_id,
            variant_id: item.variant_id,
            quantity: item.quantity,
            name: snapshot
                .as_ref()
                .map(|s| s.product_name.clone())
                .unwrap_or_else(|| item.variant_id.to_string()),
            requires_prescription: snapshot.map(|s| s.requires_prescription).unwrap_or(false),
        }
    }
}

/// Status fields of a new order row.
struct OrderState {
    order_status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    gateway_ids: (Option<String>, Option<String>),
    failure_reason: Option<String>,
}

impl OrderPlacementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        coupons: CouponService,
        prescriptions: PrescriptionService,
        gateway: Arc<dyn PaymentGateway>,
        policy: CommercePolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            coupons,
            prescriptions,
            gateway,
            policy,
        }
    }

    /// Places an order for the requested subset of the cart.
    #[instrument(skip(self, input), fields(payment_method = %input.payment_method))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        input: PlaceOrderInput,
    ) -> Result<PlacedOrder, ServiceError> {
        input.validate_all()?;
        let payment = Payment::from_request(input.payment_method, input.payment.clone())?;

        let this = self.clone();
        let attempt = input.clone();
        let result = with_transaction(&self.db, move |txn| {
            Box::pin(async move { this.place_in(txn, user_id, &attempt, payment).await })
        })
        .await;

        match result {
            Ok((order, item_count)) => {
                counter!("orders_placed_total", 1);
                info!(
                    order_number = %order.order_number,
                    %user_id,
                    total = %order.total_amount,
                    "Order placed"
                );
                self.event_sender
                    .send_or_log(Event::OrderPlaced {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                        user_id,
                        total_amount: order.total_amount,
                        payment_method: order.payment_method.to_string(),
                    })
                    .await;
                Ok(PlacedOrder::from_order(&order, item_count))
            }
            Err(ServiceError::PaymentVerificationFailed { message, .. }) => {
                let retry_order_id = match self
                    .record_failed_order(
                        user_id,
                        FailedOrderInput {
                            order: input,
                            reason: Some(message.clone()),
                        },
                    )
                    .await
                {
                    Ok(shell) => Some(shell.order_id),
                    Err(e) => {
                        error!(error = %e, %user_id, "Could not record failed order");
                        None
                    }
                };
                Err(ServiceError::PaymentVerificationFailed {
                    message,
                    retry_order_id,
                })
            }
            Err(e) => {
                warn!(error = %e, %user_id, "Order placement aborted");
                Err(e)
            }
        }
    }

    async fn place_in(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        input: &PlaceOrderInput,
        payment: Payment,
    ) -> Result<(OrderModel, usize), ServiceError> {
        let address = load_address(txn, user_id, input.address_id).await?;
        let priced = self
            .price_order(txn, user_id, &input.ordered_items, input.coupon_id, true)
            .await?;

        payment
            .authorize(
                txn,
                &*self.gateway,
                &self.policy,
                user_id,
                priced.total_amount,
            )
            .await?;

        let state = OrderState {
            order_status: OrderStatus::Confirmed,
            payment_status: payment.confirmed_status(),
            payment_method: payment.method(),
            gateway_ids: payment.gateway_ids(),
            failure_reason: None,
        };
        let order = self
            .insert_order(txn, user_id, &address, &priced, state)
            .await?;
        let items = insert_items(txn, order.id, &priced).await?;

        payment
            .on_order_confirmed(
                txn,
                user_id,
                order.id,
                &order.order_number,
                order.total_amount,
            )
            .await?;

        let lines: Vec<ConfirmedLine> = items.iter().map(ConfirmedLine::from).collect();
        settle_inventory(
            txn,
            &self.coupons,
            &self.prescriptions,
            user_id,
            &lines,
            priced.coupon.as_ref(),
        )
        .await?;

        Ok((order, items.len()))
    }

    /// Records a priced order whose payment did not go through.
    ///
    /// Uses the same pricing and coupon math as placement but leaves stock, cart
    /// and coupon usage alone.
    #[instrument(skip(self, input))]
    pub async fn record_failed_order(
        &self,
        user_id: Uuid,
        input: FailedOrderInput,
    ) -> Result<PlacedOrder, ServiceError> {
        input.order.validate_all()?;
        let reason = input
            .reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Payment failed".to_string());

        let this = self.clone();
        let failure = reason.clone();
        let (order, item_count) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order_input = &input.order;
                let address = load_address(txn, user_id, order_input.address_id).await?;
                let priced = this
                    .price_order(
                        txn,
                        user_id,
                        &order_input.ordered_items,
                        order_input.coupon_id,
                        false,
                    )
                    .await?;
                // The payment never went through, so its id is not recorded.
                let gateway_ids = (
                    order_input
                        .payment
                        .as_ref()
                        .map(|p| p.gateway_order_id.clone()),
                    None,
                );
                let state = OrderState {
                    order_status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Failed,
                    payment_method: order_input.payment_method,
                    gateway_ids,
                    failure_reason: Some(failure),
                };
                let order = this
                    .insert_order(txn, user_id, &address, &priced, state)
                    .await?;
                let items = insert_items(txn, order.id, &priced).await?;
                Ok((order, items.len()))
            })
        })
        .await?;

        counter!("orders_payment_failed_total", 1);
        warn!(order_number = %order.order_number, %user_id, %reason, "Recorded order with failed payment");
        self.event_sender
            .send_or_log(Event::OrderPaymentFailed {
                order_id: order.id,
                order_number: order.order_number.clone(),
                user_id,
                reason,
            })
            .await;

        Ok(PlacedOrder::from_order(&order, item_count))
    }

    /// Prices requested lines against the live catalog and applies a coupon.
    ///
    /// Cart-cached prices are ignored. With `require_stock` each line must be
    /// covered by current stock.
    pub(crate) async fn price_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        requested: &[OrderedItemInput],
        coupon_id: Option<Uuid>,
        require_stock: bool,
    ) -> Result<PricedOrder, ServiceError> {
        let cart = CartService::get_or_create_cart(conn, user_id).await?;
        let cart_items = CartService::cart_items(conn, cart.id).await?;
        if cart_items.iter().all(|i| i.quantity <= 0) {
            return Err(ServiceError::ValidationError("Your cart is empty".into()));
        }

        let requested = merge_requested(requested);
        let mut lines = Vec::with_capacity(requested.len());
        for wanted in &requested {
            let in_cart = cart_items
                .iter()
                .find(|i| i.product_id == wanted.product_id && i.variant_id == wanted.variant_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Item {} is not in your cart",
                        wanted.variant_id
                    ))
                })?;
            if wanted.quantity > in_cart.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Only {} unit(s) of item {} are in your cart",
                    in_cart.quantity, wanted.variant_id
                )));
            }

            let catalog = resolve_line(conn, wanted.product_id, wanted.variant_id)
                .await?
                .map_err(LineRejection::into_error)?;

            if require_stock && catalog.variant.stock < wanted.quantity {
                counter!("stock_conflicts_total", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} left of {}, {} requested",
                    catalog.variant.stock.max(0),
                    catalog.display_name(),
                    wanted.quantity
                )));
            }

            let price = catalog.price();
            lines.push(PricedLine {
                total_price: line_subtotal(price.unit_price, wanted.quantity),
                quantity: wanted.quantity,
                price,
                catalog,
            });
        }

        let subtotal: Decimal = lines.iter().map(|l| l.total_price).sum();
        let (discount, coupon) = match coupon_id {
            Some(coupon_id) => {
                let coupon = self.coupons.find_by_id(conn, coupon_id).await?;
                let evaluation = self
                    .coupons
                    .evaluate(conn, &coupon, user_id, subtotal)
                    .await?;
                if let Some(reason) = &evaluation.reason {
                    debug!(code = %coupon.code, %reason, "Coupon not applied");
                }
                (evaluation.discount, evaluation.applied)
            }
            None => (Decimal::ZERO, None),
        };

        let delivery_fee = self.policy.delivery_fee_for(subtotal);
        Ok(PricedOrder {
            lines,
            subtotal,
            delivery_fee,
            discount,
            coupon,
            total_amount: subtotal + delivery_fee - discount,
        })
    }

    /// Inserts the order header under a fresh order number.
    ///
    /// Each attempt runs in a savepoint; a unique violation on the number rolls
    /// back only the savepoint and the next counter value is tried.
    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        address: &AddressSnapshot,
        priced: &PricedOrder,
        state: OrderState,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let shipping_address = serde_json::to_value(address)
            .map_err(|e| ServiceError::InternalError(format!("address snapshot: {}", e)))?;
        let coupon = priced
            .coupon
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ServiceError::InternalError(format!("coupon snapshot: {}", e)))?;

        let template = order::ActiveModel {
            user_id: Set(user_id),
            shipping_address: Set(shipping_address),
            payment_method: Set(state.payment_method),
            payment_status: Set(state.payment_status),
            order_status: Set(state.order_status),
            subtotal: Set(priced.subtotal),
            delivery_fee: Set(priced.delivery_fee),
            discount: Set(priced.discount),
            total_amount: Set(priced.total_amount),
            coupon: Set(coupon),
            gateway_order_id: Set(state.gateway_ids.0),
            gateway_payment_id: Set(state.gateway_ids.1),
            failure_reason: Set(state.failure_reason),
            estimated_delivery: Set(now + Duration::days(self.policy.estimated_delivery_days)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let placed = Order::find().count(txn).await?;
        for attempt in 0..ORDER_NUMBER_ATTEMPTS {
            let number = format_order_number(now, placed + 1 + attempt);
            let mut active = template.clone();
            active.id = Set(Uuid::new_v4());
            active.order_number = Set(number.clone());

            let savepoint = txn.begin().await?;
            match active.insert(&savepoint).await {
                Ok(order) => {
                    savepoint.commit().await?;
                    return Ok(order);
                }
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    savepoint.rollback().await?;
                    debug!(%number, attempt, "Order number taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(
            "Could not allocate an order number, please try again".into(),
        ))
    }
}

/// Folds repeated `{productId, variantId}` entries into one line, keeping the
/// order in which lines were first requested.
fn merge_requested(requested: &[OrderedItemInput]) -> Vec<OrderedItemInput> {
    let mut merged: Vec<OrderedItemInput> = Vec::with_capacity(requested.len());
    for wanted in requested {
        match merged
            .iter_mut()
            .find(|m| m.product_id == wanted.product_id && m.variant_id == wanted.variant_id)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(wanted.quantity),
            None => merged.push(wanted.clone()),
        }
    }
    merged
}

/// `ORD-<yyyymmddHHMMSS>-<sequence padded to 6>`
pub fn format_order_number(at: DateTime<Utc>, sequence: u64) -> String {
    format!("ORD-{}-{:06}", at.format("%Y%m%d%H%M%S"), sequence)
}

async fn load_address<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    address_id: Uuid,
) -> Result<AddressSnapshot, ServiceError> {
    let address = Address::find_by_id(address_id)
        .filter(address::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Address not found".into()))?;
    Ok(AddressSnapshot::from(&address))
}

async fn insert_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    priced: &PricedOrder,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    let totals: Vec<Decimal> = priced.lines.iter().map(|l| l.total_price).collect();
    let shares = split_discount(&totals, priced.discount);
    let now = Utc::now();

    let mut items = Vec::with_capacity(priced.lines.len());
    for (line, share) in priced.lines.iter().zip(shares) {
        let snapshot = serde_json::to_value(line.catalog.snapshot(&line.price))
            .map_err(|e| ServiceError::InternalError(format!("product snapshot: {}", e)))?;
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.catalog.product.id),
            variant_id: Set(line.catalog.variant.id),
            quantity: Set(line.quantity),
            unit_price: Set(line.price.unit_price),
            total_price: Set(line.total_price),
            discount_share: Set(share),
            final_price: Set(line.total_price - share),
            product_snapshot: Set(snapshot),
            status: Set(ItemStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        items.push(item);
    }
    Ok(items)
}

/// Applies the inventory side of a confirmed order: stock, prescription quota,
/// cart and coupon usage. Shared by placement and payment retry.
pub(crate) async fn settle_inventory<C: ConnectionTrait>(
    conn: &C,
    coupons: &CouponService,
    prescriptions: &PrescriptionService,
    user_id: Uuid,
    lines: &[ConfirmedLine],
    coupon: Option<&AppliedCoupon>,
) -> Result<(), ServiceError> {
    for line in lines {
        decrement_stock(conn, line.variant_id, line.quantity, &line.name).await?;
    }

    for line in lines.iter().filter(|l| l.requires_prescription) {
        let variant = ProductVariant::find_by_id(line.variant_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Variant not found".into()))?;
        prescriptions
            .consume(conn, user_id, &variant, line.quantity)
            .await?;
    }

    let deductions: Vec<CartDeduction> = lines
        .iter()
        .map(|l| CartDeduction {
            product_id: l.product_id,
            variant_id: l.variant_id,
            quantity: l.quantity,
        })
        .collect();
    shrink_cart(conn, user_id, &deductions).await?;

    if let Some(applied) = coupon {
        coupons.record_usage(conn, applied.coupon_id, user_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_number_has_timestamp_and_padded_sequence() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_order_number(at, 42), "ORD-20240309070501-000042");
        assert_eq!(
            format_order_number(at, 1_234_567),
            "ORD-20240309070501-1234567"
        );
    }

    #[test]
    fn repeated_lines_are_merged_per_variant() {
        let (product, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let line = |variant_id, quantity| OrderedItemInput {
            product_id: product,
            variant_id,
            quantity,
        };

        let merged = merge_requested(&[line(a, 1), line(b, 2), line(a, 1), line(a, 1)]);
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].variant_id, merged[0].quantity), (a, 3));
        assert_eq!((merged[1].variant_id, merged[1].quantity), (b, 2));
    }

    #[test]
    fn place_order_input_accepts_gateway_field_names() {
        let input: PlaceOrderInput = serde_json::from_value(serde_json::json!({
            "addressId": Uuid::nil(),
            "paymentMethod": "netBanking",
            "orderedItems": [{"productId": Uuid::nil(), "variantId": Uuid::nil(), "quantity": 1}],
            "razorpay_order_id": "order_1",
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": "abcd"
        }))
        .unwrap();
        assert_eq!(input.payment_method, PaymentMethod::NetBanking);
        let proof = input.payment.unwrap();
        assert_eq!(proof.gateway_order_id, "order_1");
        assert_eq!(proof.signature, "abcd");
    }

    #[test]
    fn place_order_input_without_gateway_fields() {
        let input: PlaceOrderInput = serde_json::from_value(serde_json::json!({
            "addressId": Uuid::nil(),
            "paymentMethod": "cod",
            "orderedItems": []
        }))
        .unwrap();
        assert!(input.payment.is_none());
        assert!(input.validate_all().is_err());
    }
}
