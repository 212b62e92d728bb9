use crate::{
    config::CommercePolicy,
    db::with_transaction,
    entities::{
        commerce::LedgerSource,
        order::{self, Entity as Order, Model as OrderModel},
        order_item::{self, Entity as OrderItem, Model as OrderItemModel},
        Actor, ItemStatus, OrderStatus, PaymentMethod, PaymentStatus, ReturnRequestStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory::restore_stock,
        wallet::{LedgerEntry, WalletService},
    },
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Whether an admin may move an order from `from` to `to`.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, Processing)
            | (Processing, Shipped)
            | (Shipped, OutForDelivery)
            | (OutForDelivery, Delivered)
            | (Pending | Confirmed | Processing | Shipped | OutForDelivery, Cancelled)
            | (Delivered, Returned)
    )
}

/// Returns are accepted up to and including `window_days` after delivery.
pub fn ensure_within_return_window(
    delivered_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window_days: i64,
) -> Result<(), ServiceError> {
    if now - delivered_at > Duration::days(window_days) {
        return Err(ServiceError::PolicyViolation(format!(
            "The {}-day return window for this order has closed",
            window_days
        )));
    }
    Ok(())
}

fn is_cancellable_by_customer(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing
    )
}

fn already_terminal(order: &OrderModel) -> Option<ServiceError> {
    match order.order_status {
        OrderStatus::Cancelled => Some(ServiceError::Conflict(format!(
            "Order {} is already cancelled",
            order.order_number
        ))),
        OrderStatus::Returned => Some(ServiceError::Conflict(format!(
            "Order {} is already returned",
            order.order_number
        ))),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusInput {
    pub order_status: OrderStatus,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelInput {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequestInput {
    #[validate(length(min = 1, message = "Select at least one item to return"))]
    pub item_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 500, message = "Please tell us why you are returning"))]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReturnInput {
    pub action: ReturnAction,
    #[serde(default)]
    pub item_ids: Vec<Uuid>,
    #[serde(default)]
    pub rejected_item_ids: Vec<Uuid>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub rejection_reason: Option<String>,
}

impl ResolveReturnInput {
    /// Splits the request into accepted and rejected item ids.
    fn partition(&self) -> Result<(Vec<Uuid>, Vec<Uuid>), ServiceError> {
        let (accepted, rejected) = match self.action {
            ReturnAction::Accept => (self.item_ids.clone(), self.rejected_item_ids.clone()),
            ReturnAction::Reject => {
                let mut all = self.item_ids.clone();
                all.extend(self.rejected_item_ids.iter().copied());
                (Vec::new(), all)
            }
        };
        if accepted.is_empty() && rejected.is_empty() {
            return Err(ServiceError::ValidationError(
                "Select at least one item".into(),
            ));
        }
        if accepted.iter().any(|id| rejected.contains(id)) {
            return Err(ServiceError::ValidationError(
                "An item cannot be both accepted and rejected".into(),
            ));
        }
        let has_reason = self
            .rejection_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if !rejected.is_empty() && !has_reason {
            return Err(ServiceError::ValidationError(
                "A rejection reason is required".into(),
            ));
        }
        Ok((accepted, rejected))
    }
}

/// Order with its lines, as returned by lifecycle operations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Order lifecycle engine.
///
/// Drives the order-level state machine and the independent per-item cancel and
/// return sub-states. Stock goes back on the shelf exactly once per item: every
/// item and order update is conditional on the state it was read in.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    policy: CommercePolicy,
}

impl OrderLifecycleService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        policy: CommercePolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            policy,
        }
    }

    /// Admin status transition.
    #[instrument(skip(self, input), fields(new_status = %input.order_status))]
    pub async fn update_status(
        &self,
        order_ref: &str,
        input: UpdateStatusInput,
    ) -> Result<OrderDetails, ServiceError> {
        input.validate()?;
        let target = input.order_status;
        let window_days = self.policy.return_window_days;
        let order_ref = order_ref.to_string();

        let (before, details) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, &order_ref, None).await?;
                if let Some(err) = already_terminal(&order) {
                    return Err(err);
                }
                if !is_valid_transition(order.order_status, target) {
                    return Err(ServiceError::ValidationError(format!(
                        "Cannot move order from {} to {}",
                        order.order_status, target
                    )));
                }
                if order.payment_status == PaymentStatus::Failed && target != OrderStatus::Cancelled
                {
                    return Err(ServiceError::PolicyViolation(
                        "Payment for this order has not been completed".into(),
                    ));
                }

                let now = Utc::now();
                match target {
                    OrderStatus::Cancelled => {
                        cancel_whole_order(txn, &order, Actor::Admin, input.reason, now).await?;
                    }
                    OrderStatus::Returned => {
                        let delivered_at = order.delivered_at.ok_or_else(|| {
                            ServiceError::Conflict("Order has no delivery date".into())
                        })?;
                        ensure_within_return_window(delivered_at, now, window_days)?;
                        return_whole_order(txn, &order, now).await?;
                    }
                    OrderStatus::Delivered => {
                        let mut update = Order::update_many()
                            .col_expr(order::Column::OrderStatus, Expr::value(target))
                            .col_expr(order::Column::DeliveredAt, Expr::value(Some(now)))
                            .col_expr(order::Column::UpdatedAt, Expr::value(now));
                        if order.payment_method == PaymentMethod::Cod {
                            update = update.col_expr(
                                order::Column::PaymentStatus,
                                Expr::value(PaymentStatus::Completed),
                            );
                        }
                        expect_one(guard(update, &order).exec(txn).await?)?;
                    }
                    _ => {
                        let update = Order::update_many()
                            .col_expr(order::Column::OrderStatus, Expr::value(target))
                            .col_expr(order::Column::UpdatedAt, Expr::value(now));
                        expect_one(guard(update, &order).exec(txn).await?)?;
                    }
                }

                let details = load_details(txn, order.id).await?;
                Ok((order.order_status, details))
            })
        })
        .await?;

        self.status_changed(before, &details.order).await;
        Ok(details)
    }

    /// Customer cancels a whole order before it ships.
    #[instrument(skip(self, input))]
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_number: &str,
        input: CancelInput,
    ) -> Result<OrderDetails, ServiceError> {
        input.validate()?;
        let order_number = order_number.to_string();

        let (before, details) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, &order_number, Some(user_id)).await?;
                if let Some(err) = already_terminal(&order) {
                    return Err(err);
                }
                if !is_cancellable_by_customer(order.order_status) {
                    return Err(ServiceError::PolicyViolation(format!(
                        "Order {} has already shipped and can no longer be cancelled",
                        order.order_number
                    )));
                }
                cancel_whole_order(txn, &order, Actor::User, input.reason, Utc::now()).await?;
                let details = load_details(txn, order.id).await?;
                Ok((order.order_status, details))
            })
        })
        .await?;

        self.status_changed(before, &details.order).await;
        Ok(details)
    }

    /// Customer cancels one line. Cancelling the last active line cancels the order.
    #[instrument(skip(self, input))]
    pub async fn cancel_item(
        &self,
        user_id: Uuid,
        order_number: &str,
        item_id: Uuid,
        input: CancelInput,
    ) -> Result<OrderDetails, ServiceError> {
        input.validate()?;
        let order_number = order_number.to_string();

        let (before, quantity, details) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, &order_number, Some(user_id)).await?;
                if let Some(err) = already_terminal(&order) {
                    return Err(err);
                }
                if !is_cancellable_by_customer(order.order_status) {
                    return Err(ServiceError::PolicyViolation(
                        "Items can only be cancelled before the order ships".into(),
                    ));
                }

                let item = find_item(txn, order.id, item_id).await?;
                let now = Utc::now();
                cancel_items(txn, &order, &[item.clone()], Actor::User, &input.reason, now).await?;
                if order.is_refundable() {
                    refund(
                        txn,
                        &order,
                        item.final_price,
                        format!("Refund for cancelled item in order {}", order.order_number),
                    )
                    .await?;
                }

                let remaining = OrderItem::find()
                    .filter(order_item::Column::OrderId.eq(order.id))
                    .filter(order_item::Column::Status.ne(ItemStatus::Cancelled))
                    .all(txn)
                    .await?;
                if remaining.is_empty() {
                    let mut update = Order::update_many()
                        .col_expr(
                            order::Column::OrderStatus,
                            Expr::value(OrderStatus::Cancelled),
                        )
                        .col_expr(order::Column::CancelledAt, Expr::value(Some(now)))
                        .col_expr(order::Column::CancelledBy, Expr::value(Some(Actor::User)))
                        .col_expr(
                            order::Column::CancellationReason,
                            Expr::value(input.reason.clone()),
                        )
                        .col_expr(order::Column::UpdatedAt, Expr::value(now));
                    if order.is_refundable() {
                        refund(
                            txn,
                            &order,
                            order.delivery_fee,
                            format!("Delivery fee refund for order {}", order.order_number),
                        )
                        .await?;
                        update = update.col_expr(
                            order::Column::PaymentStatus,
                            Expr::value(PaymentStatus::Refunded),
                        );
                    }
                    expect_one(guard(update, &order).exec(txn).await?)?;
                }

                let details = load_details(txn, order.id).await?;
                Ok((order.order_status, item.quantity, details))
            })
        })
        .await?;

        info!(order_number = %details.order.order_number, %user_id, %item_id, "Order item cancelled");
        self.event_sender
            .send_or_log(Event::OrderItemCancelled {
                order_id: details.order.id,
                item_id,
                quantity,
            })
            .await;
        self.status_changed(before, &details.order).await;
        Ok(details)
    }

    /// Customer asks to return delivered items.
    #[instrument(skip(self, input))]
    pub async fn request_return(
        &self,
        user_id: Uuid,
        order_number: &str,
        input: ReturnRequestInput,
    ) -> Result<OrderDetails, ServiceError> {
        input.validate()?;
        let window_days = self.policy.return_window_days;
        let order_number = order_number.to_string();
        let item_ids = input.item_ids.clone();

        let details = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, &order_number, Some(user_id)).await?;
                if let Some(err) = already_terminal(&order) {
                    return Err(err);
                }
                if order.order_status != OrderStatus::Delivered {
                    return Err(ServiceError::PolicyViolation(
                        "Only delivered orders can be returned".into(),
                    ));
                }
                let delivered_at = order
                    .delivered_at
                    .ok_or_else(|| ServiceError::Conflict("Order has no delivery date".into()))?;
                let now = Utc::now();
                ensure_within_return_window(delivered_at, now, window_days)?;

                for item_id in &input.item_ids {
                    let item = find_item(txn, order.id, *item_id).await?;
                    if item.status != ItemStatus::Active {
                        return Err(ServiceError::Conflict(format!(
                            "Item {} cannot be returned",
                            item.id
                        )));
                    }
                    if item.return_request_status.is_some() {
                        return Err(ServiceError::Conflict(format!(
                            "A return was already requested for item {}",
                            item.id
                        )));
                    }
                    let result = OrderItem::update_many()
                        .col_expr(
                            order_item::Column::ReturnRequestStatus,
                            Expr::value(Some(ReturnRequestStatus::Pending)),
                        )
                        .col_expr(
                            order_item::Column::ReturnReason,
                            Expr::value(Some(input.reason.clone())),
                        )
                        .col_expr(order_item::Column::ReturnRequestedAt, Expr::value(Some(now)))
                        .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
                        .filter(order_item::Column::Id.eq(item.id))
                        .filter(order_item::Column::ReturnRequestStatus.is_null())
                        .exec(txn)
                        .await?;
                    expect_one(result)?;
                }

                load_details(txn, order.id).await
            })
        })
        .await?;

        info!(order_number = %details.order.order_number, %user_id, items = item_ids.len(), "Return requested");
        self.event_sender
            .send_or_log(Event::ReturnRequested {
                order_id: details.order.id,
                item_ids,
            })
            .await;
        Ok(details)
    }

    /// Admin accepts or rejects pending return requests.
    ///
    /// Accepted items go back into stock and are refunded when the order was
    /// prepaid. Once every non-cancelled item is returned the order becomes
    /// `returned` with its payment marked refunded.
    #[instrument(skip(self, input), fields(action = ?input.action))]
    pub async fn resolve_return(
        &self,
        order_ref: &str,
        input: ResolveReturnInput,
    ) -> Result<OrderDetails, ServiceError> {
        input.validate()?;
        let (accepted, rejected) = input.partition()?;
        let order_ref = order_ref.to_string();
        let rejection_reason = input.rejection_reason.clone();
        let (accepted_ids, rejected_ids) = (accepted.clone(), rejected.clone());

        let (before, details) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, &order_ref, None).await?;
                if let Some(err) = already_terminal(&order) {
                    return Err(err);
                }
                let now = Utc::now();

                for item_id in &accepted {
                    let item = find_pending_return(txn, order.id, *item_id).await?;
                    let result = OrderItem::update_many()
                        .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Returned))
                        .col_expr(
                            order_item::Column::ReturnRequestStatus,
                            Expr::value(Some(ReturnRequestStatus::Accepted)),
                        )
                        .col_expr(order_item::Column::ReturnedAt, Expr::value(Some(now)))
                        .col_expr(order_item::Column::ReturnedBy, Expr::value(Some(Actor::Admin)))
                        .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
                        .filter(order_item::Column::Id.eq(item.id))
                        .filter(order_item::Column::Status.eq(ItemStatus::Active))
                        .filter(
                            order_item::Column::ReturnRequestStatus
                                .eq(ReturnRequestStatus::Pending),
                        )
                        .exec(txn)
                        .await?;
                    expect_one(result)?;
                    restore_stock(txn, item.variant_id, item.quantity).await?;
                    if order.is_refundable() {
                        refund(
                            txn,
                            &order,
                            item.final_price,
                            format!("Refund for returned item in order {}", order.order_number),
                        )
                        .await?;
                    }
                }

                for item_id in &rejected {
                    let item = find_pending_return(txn, order.id, *item_id).await?;
                    let result = OrderItem::update_many()
                        .col_expr(
                            order_item::Column::ReturnRequestStatus,
                            Expr::value(Some(ReturnRequestStatus::Rejected)),
                        )
                        .col_expr(
                            order_item::Column::ReturnRejectionReason,
                            Expr::value(rejection_reason.clone()),
                        )
                        .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
                        .filter(order_item::Column::Id.eq(item.id))
                        .filter(
                            order_item::Column::ReturnRequestStatus
                                .eq(ReturnRequestStatus::Pending),
                        )
                        .exec(txn)
                        .await?;
                    expect_one(result)?;
                }

                let items = OrderItem::find()
                    .filter(order_item::Column::OrderId.eq(order.id))
                    .filter(order_item::Column::Status.ne(ItemStatus::Cancelled))
                    .all(txn)
                    .await?;
                let all_returned = !items.is_empty()
                    && items.iter().all(|i| i.status == ItemStatus::Returned);
                if all_returned {
                    let update = Order::update_many()
                        .col_expr(
                            order::Column::OrderStatus,
                            Expr::value(OrderStatus::Returned),
                        )
                        .col_expr(
                            order::Column::PaymentStatus,
                            Expr::value(PaymentStatus::Refunded),
                        )
                        .col_expr(order::Column::ReturnedAt, Expr::value(Some(now)))
                        .col_expr(order::Column::UpdatedAt, Expr::value(now));
                    expect_one(guard(update, &order).exec(txn).await?)?;
                }

                let details = load_details(txn, order.id).await?;
                Ok((order.order_status, details))
            })
        })
        .await?;

        info!(
            order_number = %details.order.order_number,
            accepted = accepted_ids.len(),
            rejected = rejected_ids.len(),
            "Return resolved"
        );
        self.event_sender
            .send_or_log(Event::ReturnResolved {
                order_id: details.order.id,
                accepted: accepted_ids,
                rejected: rejected_ids,
            })
            .await;
        self.status_changed(before, &details.order).await;
        Ok(details)
    }

    async fn status_changed(&self, before: OrderStatus, order: &OrderModel) {
        if before == order.order_status {
            return;
        }
        info!(
            order_number = %order.order_number,
            user_id = %order.user_id,
            from = %before,
            to = %order.order_status,
            "Order status changed"
        );
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: before.to_string(),
                new_status: order.order_status.to_string(),
                changed_at: order.updated_at,
            })
            .await;
    }
}

/// Accepts an order number or an order id. `owner` scopes the lookup to one user.
pub(crate) async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_ref: &str,
    owner: Option<Uuid>,
) -> Result<OrderModel, ServiceError> {
    let mut query = Order::find();
    query = match Uuid::parse_str(order_ref) {
        Ok(id) => query.filter(order::Column::Id.eq(id)),
        Err(_) => query.filter(order::Column::OrderNumber.eq(order_ref)),
    };
    if let Some(user_id) = owner {
        query = query.filter(order::Column::UserId.eq(user_id));
    }
    query
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_ref)))
}

pub(crate) async fn load_details<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<OrderDetails, ServiceError> {
    let order = Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?;
    Ok(OrderDetails { order, items })
}

async fn find_item<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    item_id: Uuid,
) -> Result<OrderItemModel, ServiceError> {
    OrderItem::find_by_id(item_id)
        .filter(order_item::Column::OrderId.eq(order_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))
}

async fn find_pending_return<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    item_id: Uuid,
) -> Result<OrderItemModel, ServiceError> {
    let item = find_item(conn, order_id, item_id).await?;
    if item.return_request_status != Some(ReturnRequestStatus::Pending) {
        return Err(ServiceError::Conflict(format!(
            "Item {} has no pending return request",
            item.id
        )));
    }
    Ok(item)
}

/// Restricts an order update to the status it was read in.
fn guard(update: sea_orm::UpdateMany<Order>, order: &OrderModel) -> sea_orm::UpdateMany<Order> {
    update
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::OrderStatus.eq(order.order_status))
}

fn expect_one(result: sea_orm::UpdateResult) -> Result<(), ServiceError> {
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(
            "The order was changed by another request, please reload it".into(),
        ));
    }
    Ok(())
}

/// Marks active items cancelled and, if the order still holds stock, restocks them.
async fn cancel_items<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    items: &[OrderItemModel],
    actor: Actor,
    reason: &Option<String>,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    for item in items {
        if item.status != ItemStatus::Active {
            return Err(ServiceError::Conflict(format!(
                "Item {} is already {}",
                item.id,
                if item.status == ItemStatus::Cancelled {
                    "cancelled"
                } else {
                    "returned"
                }
            )));
        }
        let result = OrderItem::update_many()
            .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Cancelled))
            .col_expr(order_item::Column::CancelledAt, Expr::value(Some(now)))
            .col_expr(order_item::Column::CancelledBy, Expr::value(Some(actor)))
            .col_expr(order_item::Column::CancellationReason, Expr::value(reason.clone()))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
            .filter(order_item::Column::Id.eq(item.id))
            .filter(order_item::Column::Status.eq(ItemStatus::Active))
            .exec(conn)
            .await?;
        expect_one(result)?;
        if order.holds_stock() {
            restore_stock(conn, item.variant_id, item.quantity).await?;
        }
    }
    Ok(())
}

async fn cancel_whole_order<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    actor: Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let active = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .filter(order_item::Column::Status.eq(ItemStatus::Active))
        .all(conn)
        .await?;
    cancel_items(conn, order, &active, actor, &reason, now).await?;

    let mut update = Order::update_many()
        .col_expr(
            order::Column::OrderStatus,
            Expr::value(OrderStatus::Cancelled),
        )
        .col_expr(order::Column::CancelledAt, Expr::value(Some(now)))
        .col_expr(order::Column::CancelledBy, Expr::value(Some(actor)))
        .col_expr(order::Column::CancellationReason, Expr::value(reason))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));

    if order.is_refundable() {
        let amount: Decimal =
            active.iter().map(|i| i.final_price).sum::<Decimal>() + order.delivery_fee;
        refund(
            conn,
            order,
            amount,
            format!("Refund for cancelled order {}", order.order_number),
        )
        .await?;
        update = update.col_expr(
            order::Column::PaymentStatus,
            Expr::value(PaymentStatus::Refunded),
        );
    }

    expect_one(guard(update, order).exec(conn).await?)?;
    info!(order_number = %order.order_number, user_id = %order.user_id, ?actor, items = active.len(), "Order cancelled, stock restored");
    Ok(())
}

async fn return_whole_order<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let active = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .filter(order_item::Column::Status.eq(ItemStatus::Active))
        .all(conn)
        .await?;

    for item in &active {
        let result = OrderItem::update_many()
            .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Returned))
            .col_expr(order_item::Column::ReturnedAt, Expr::value(Some(now)))
            .col_expr(order_item::Column::ReturnedBy, Expr::value(Some(Actor::Admin)))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
            .filter(order_item::Column::Id.eq(item.id))
            .filter(order_item::Column::Status.eq(ItemStatus::Active))
            .exec(conn)
            .await?;
        expect_one(result)?;
        restore_stock(conn, item.variant_id, item.quantity).await?;
    }

    if order.is_refundable() {
        let amount: Decimal = active.iter().map(|i| i.final_price).sum();
        refund(
            conn,
            order,
            amount,
            format!("Refund for returned order {}", order.order_number),
        )
        .await?;
    }

    let update = Order::update_many()
        .col_expr(
            order::Column::OrderStatus,
            Expr::value(OrderStatus::Returned),
        )
        .col_expr(
            order::Column::PaymentStatus,
            Expr::value(PaymentStatus::Refunded),
        )
        .col_expr(order::Column::ReturnedAt, Expr::value(Some(now)))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));
    expect_one(guard(update, order).exec(conn).await?)?;
    info!(order_number = %order.order_number, user_id = %order.user_id, items = active.len(), "Order returned, stock restored");
    Ok(())
}

async fn refund<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    amount: Decimal,
    description: String,
) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Ok(());
    }
    WalletService::credit(
        conn,
        order.user_id,
        LedgerEntry {
            source: LedgerSource::Refund,
            amount,
            order_id: Some(order.id),
            payment_method: Some(order.payment_method.to_string()),
            external_transaction_id: None,
            description,
        },
    )
    .await?;
    info!(order_number = %order.order_number, %amount, "Refunded to wallet");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use OrderStatus::*;

    #[test]
    fn forward_chain_is_allowed_one_step_at_a_time() {
        assert!(is_valid_transition(Pending, Confirmed));
        assert!(is_valid_transition(Confirmed, Processing));
        assert!(is_valid_transition(Processing, Shipped));
        assert!(is_valid_transition(Shipped, OutForDelivery));
        assert!(is_valid_transition(OutForDelivery, Delivered));
        assert!(!is_valid_transition(Confirmed, Delivered));
        assert!(!is_valid_transition(Shipped, Processing));
    }

    #[test]
    fn cancel_only_before_delivery_and_return_only_after() {
        for from in [Pending, Confirmed, Processing, Shipped, OutForDelivery] {
            assert!(is_valid_transition(from, Cancelled), "{from} -> cancelled");
            assert!(!is_valid_transition(from, Returned));
        }
        assert!(!is_valid_transition(Delivered, Cancelled));
        assert!(is_valid_transition(Delivered, Returned));
        for to in [Pending, Confirmed, Delivered, Cancelled, Returned] {
            assert!(!is_valid_transition(Cancelled, to));
            assert!(!is_valid_transition(Returned, to));
        }
    }

    #[test]
    fn return_window_is_inclusive() {
        let delivered = Utc::now() - Duration::days(30);
        let edge = delivered + Duration::days(14);
        assert!(ensure_within_return_window(delivered, edge, 14).is_ok());
        assert_matches!(
            ensure_within_return_window(delivered, edge + Duration::seconds(1), 14),
            Err(ServiceError::PolicyViolation(_))
        );
        assert_matches!(
            ensure_within_return_window(delivered, edge + Duration::milliseconds(1), 14),
            Err(ServiceError::PolicyViolation(_))
        );
    }

    #[test]
    fn reject_action_requires_reason() {
        let input = ResolveReturnInput {
            action: ReturnAction::Reject,
            item_ids: vec![Uuid::new_v4()],
            rejected_item_ids: vec![],
            rejection_reason: None,
        };
        assert_matches!(input.partition(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn accept_action_partitions_ids() {
        let (a, r) = (Uuid::new_v4(), Uuid::new_v4());
        let input = ResolveReturnInput {
            action: ReturnAction::Accept,
            item_ids: vec![a],
            rejected_item_ids: vec![r],
            rejection_reason: Some("Seal broken".into()),
        };
        assert_eq!(input.partition().unwrap(), (vec![a], vec![r]));

        let overlapping = ResolveReturnInput {
            rejected_item_ids: vec![a],
            ..input
        };
        assert!(overlapping.partition().is_err());
    }
}
