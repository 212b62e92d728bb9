use crate::{
    config::CommercePolicy,
    db::with_transaction,
    entities::{
        order::{self, Entity as Order, Model as OrderModel},
        order_item::{self, Entity as OrderItem},
        IntentPurpose, ItemStatus, OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            catalog::{resolve_line, LineRejection},
            coupon_service::CouponService,
            prescription_service::PrescriptionService,
        },
        order_placement::{settle_inventory, ConfirmedLine, PlacedOrder},
        payment_gateway::{GatewayProof, PaymentGateway},
        payment_intents::{self, GatewayIntent},
        payments::Payment,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const NOT_RETRYABLE: &str = "Order not found or already processed";

/// Payment retry engine.
///
/// Confirms a `pending`/`failed` order once payment succeeds. Stock is
/// re-validated because it may have been sold while the order sat unpaid; the
/// order is never re-priced.
#[derive(Clone)]
pub struct PaymentRetryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    coupons: CouponService,
    prescriptions: PrescriptionService,
    gateway: Arc<dyn PaymentGateway>,
    policy: CommercePolicy,
    currency: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RetryIntentInput {
    /// Order number of the failed order
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentInput {
    /// Order number of the failed order
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(flatten)]
    pub payment: Option<GatewayProof>,
}

impl PaymentRetryService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        coupons: CouponService,
        prescriptions: PrescriptionService,
        gateway: Arc<dyn PaymentGateway>,
        policy: CommercePolicy,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            coupons,
            prescriptions,
            gateway,
            policy,
            currency,
        }
    }

    /// Creates a gateway payment intent for the stored total of a failed order.
    #[instrument(skip(self, input), fields(order_number = %input.order_id))]
    pub async fn create_gateway_intent(
        &self,
        user_id: Uuid,
        input: RetryIntentInput,
    ) -> Result<GatewayIntent, ServiceError> {
        input.validate()?;
        let order = find_retryable(&*self.db, user_id, &input.order_id).await?;
        payment_intents::create_intent(
            &*self.db,
            &*self.gateway,
            user_id,
            IntentPurpose::Order,
            order.total_amount,
            &self.currency,
        )
        .await
    }

    #[instrument(skip(self, input), fields(order_number = %input.order_id))]
    pub async fn retry(
        &self,
        user_id: Uuid,
        input: RetryPaymentInput,
    ) -> Result<PlacedOrder, ServiceError> {
        input.validate()?;
        let order_number = input.order_id.clone();

        let this = self.clone();
        let result = with_transaction(&self.db, move |txn| {
            Box::pin(async move { this.retry_in(txn, user_id, input).await })
        })
        .await;

        match result {
            Ok((order, item_count)) => {
                counter!("orders_placed_total", 1);
                info!(%order_number, %user_id, "Failed order confirmed on retry");
                self.event_sender
                    .send_or_log(Event::OrderPaymentRetried {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                        user_id,
                    })
                    .await;
                Ok(PlacedOrder::from_order(&order, item_count))
            }
            Err(ServiceError::PaymentVerificationFailed { message, .. }) => {
                counter!("orders_payment_failed_total", 1);
                warn!(%order_number, %user_id, "Retry payment could not be verified");
                Err(ServiceError::PaymentVerificationFailed {
                    message,
                    retry_order_id: Some(order_number),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn retry_in(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        input: RetryPaymentInput,
    ) -> Result<(OrderModel, usize), ServiceError> {
        let order = find_retryable(txn, user_id, &input.order_id).await?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::Status.eq(ItemStatus::Active))
            .all(txn)
            .await?;

        for item in &items {
            let catalog = resolve_line(txn, item.product_id, item.variant_id)
                .await?
                .map_err(LineRejection::into_error)?;
            if catalog.variant.stock < item.quantity {
                counter!("stock_conflicts_total", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} left of {}, {} ordered. Please cancel this order and check out again",
                    catalog.variant.stock.max(0),
                    catalog.display_name(),
                    item.quantity
                )));
            }
        }

        let method = input.payment_method.unwrap_or(order.payment_method);
        let payment = Payment::from_request(method, input.payment)?;
        payment
            .authorize(
                txn,
                &*self.gateway,
                &self.policy,
                user_id,
                order.total_amount,
            )
            .await?;

        let (gateway_order_id, gateway_payment_id) = payment.gateway_ids();
        let confirmed = Order::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Confirmed),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(payment.confirmed_status()),
            )
            .col_expr(order::Column::PaymentMethod, Expr::value(payment.method()))
            .col_expr(order::Column::GatewayOrderId, Expr::value(gateway_order_id))
            .col_expr(
                order::Column::GatewayPaymentId,
                Expr::value(gateway_payment_id),
            )
            .col_expr(order::Column::FailureReason, Expr::value(Option::<String>::None))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Failed))
            .exec(txn)
            .await?;
        if confirmed.rows_affected == 0 {
            return Err(ServiceError::NotFound(NOT_RETRYABLE.into()));
        }

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
            order.applied_coupon().as_ref(),
        )
        .await?;

        let order = Order::find_by_id(order.id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(NOT_RETRYABLE.into()))?;
        Ok((order, items.len()))
    }
}

async fn find_retryable<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_number: &str,
) -> Result<OrderModel, ServiceError> {
    Order::find()
        .filter(order::Column::OrderNumber.eq(order_number))
        .filter(order::Column::UserId.eq(user_id))
        .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Failed))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(NOT_RETRYABLE.into()))
}
