mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{SeedVariant, SeededItem, TestApp};
use rust_decimal_macros::dec;
use rxcart_api::{
    entities::{
        order::{self, Entity as Order},
        ItemStatus, OrderStatus, PaymentMethod, PaymentStatus, ReturnRequestStatus,
    },
    errors::ServiceError,
    services::{
        order_placement::{OrderedItemInput, PlaceOrderInput, PlacedOrder},
        order_status::{
            CancelInput, OrderDetails, ResolveReturnInput, ReturnAction, ReturnRequestInput,
            UpdateStatusInput,
        },
    },
};
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

async fn place(
    app: &TestApp,
    items: &[(SeededItem, i32)],
    payment_method: PaymentMethod,
) -> PlacedOrder {
    for (item, quantity) in items {
        app.put_in_cart(app.user_id, *item, *quantity).await;
    }
    let address_id = app.seed_address(app.user_id).await;
    app.state
        .services
        .placement
        .place_order(
            app.user_id,
            PlaceOrderInput {
                address_id,
                payment_method,
                ordered_items: items
                    .iter()
                    .map(|(item, quantity)| OrderedItemInput {
                        product_id: item.product_id,
                        variant_id: item.variant_id,
                        quantity: *quantity,
                    })
                    .collect(),
                coupon_id: None,
                payment: None,
            },
        )
        .await
        .unwrap()
}

async fn set_status(
    app: &TestApp,
    order_ref: &str,
    status: OrderStatus,
) -> Result<OrderDetails, ServiceError> {
    app.state
        .services
        .lifecycle
        .update_status(
            order_ref,
            UpdateStatusInput {
                order_status: status,
                reason: None,
            },
        )
        .await
}

async fn deliver(app: &TestApp, order_ref: &str) {
    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        set_status(app, order_ref, status).await.unwrap();
    }
}

fn item_id(details: &OrderDetails, item: SeededItem) -> Uuid {
    details
        .items
        .iter()
        .find(|i| i.variant_id == item.variant_id)
        .unwrap()
        .id
}

#[tokio::test]
async fn admin_moves_order_one_step_at_a_time() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    let placed = place(&app, &[(item, 1)], PaymentMethod::Cod).await;

    let err = set_status(&app, &placed.order_id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    // Lookup by id works as well as by order number.
    let details = set_status(&app, &placed.id.to_string(), OrderStatus::Processing)
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Processing);

    let err = set_status(&app, &placed.order_id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    for status in [
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        set_status(&app, &placed.order_id, status).await.unwrap();
    }

    let details = app
        .state
        .services
        .orders
        .get_for_admin(&placed.order_id)
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Delivered);
    assert!(details.order.delivered_at.is_some());
    // Cash is collected on delivery.
    assert_eq!(details.order.payment_status, PaymentStatus::Completed);

    let err = set_status(&app, &placed.order_id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = set_status(&app, "ORD-00000000000000-000000", OrderStatus::Processing)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn admin_cannot_confirm_an_unpaid_order() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    let placed = place(&app, &[(item, 1)], PaymentMethod::Cod).await;
    Order::update_many()
        .col_expr(order::Column::OrderStatus, Expr::value(OrderStatus::Pending))
        .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
        .filter(order::Column::Id.eq(placed.id))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let err = set_status(&app, &placed.order_id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(_));

    // A pending order holds no stock, so nothing is put back.
    let details = set_status(&app, &placed.order_id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Cancelled);
    assert_eq!(app.stock_of(item.variant_id).await, 4);
}

#[tokio::test]
async fn cancelling_a_wallet_order_restocks_and_refunds() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(350), 5)).await;
    app.fund_wallet(app.user_id, dec!(500)).await;
    let placed = place(&app, &[(item, 1)], PaymentMethod::Wallet).await;
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(150));
    assert_eq!(app.stock_of(item.variant_id).await, 4);

    let lifecycle = &app.state.services.lifecycle;
    let details = lifecycle
        .cancel_order(
            app.user_id,
            &placed.order_id,
            CancelInput {
                reason: Some("Ordered by mistake".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Cancelled);
    assert_eq!(details.order.payment_status, PaymentStatus::Refunded);
    assert!(details
        .items
        .iter()
        .all(|i| i.status == ItemStatus::Cancelled));
    assert_eq!(app.stock_of(item.variant_id).await, 5);
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(500));

    let err = lifecycle
        .cancel_order(app.user_id, &placed.order_id, CancelInput::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(app.stock_of(item.variant_id).await, 5);
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(500));
}

#[tokio::test]
async fn customer_cannot_cancel_after_shipping() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    let placed = place(&app, &[(item, 1)], PaymentMethod::Cod).await;
    set_status(&app, &placed.order_id, OrderStatus::Processing)
        .await
        .unwrap();
    set_status(&app, &placed.order_id, OrderStatus::Shipped)
        .await
        .unwrap();

    let err = app
        .state
        .services
        .lifecycle
        .cancel_order(app.user_id, &placed.order_id, CancelInput::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(_));

    // Someone else's order is invisible.
    let err = app
        .state
        .services
        .lifecycle
        .cancel_order(app.admin_id, &placed.order_id, CancelInput::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn cancelling_items_one_by_one_cancels_the_order() {
    let app = TestApp::new().await;
    let a = app.seed_item(SeedVariant::priced(dec!(120), 5)).await;
    let b = app.seed_item(SeedVariant::priced(dec!(120), 5)).await;
    app.fund_wallet(app.user_id, dec!(500)).await;
    let placed = place(&app, &[(a, 1), (b, 1)], PaymentMethod::Wallet).await;
    assert_eq!(placed.total_amount, dec!(290));
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(210));

    let lifecycle = &app.state.services.lifecycle;
    let details = app
        .state
        .services
        .orders
        .get_for_user(app.user_id, &placed.order_id)
        .await
        .unwrap();
    let (a_id, b_id) = (item_id(&details, a), item_id(&details, b));

    let details = lifecycle
        .cancel_item(app.user_id, &placed.order_id, a_id, CancelInput::default())
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Confirmed);
    assert_eq!(app.stock_of(a.variant_id).await, 5);
    assert_eq!(app.stock_of(b.variant_id).await, 4);
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(330));

    let err = lifecycle
        .cancel_item(app.user_id, &placed.order_id, a_id, CancelInput::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(app.stock_of(a.variant_id).await, 5);

    let details = lifecycle
        .cancel_item(app.user_id, &placed.order_id, b_id, CancelInput::default())
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Cancelled);
    assert_eq!(details.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(app.stock_of(b.variant_id).await, 5);
    // Both lines plus the delivery fee.
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(500));
}

#[tokio::test]
async fn accepted_returns_restock_and_close_the_order() {
    let app = TestApp::new().await;
    let a = app.seed_item(SeedVariant::priced(dec!(200), 5)).await;
    let b = app.seed_item(SeedVariant::priced(dec!(300), 5)).await;
    app.fund_wallet(app.user_id, dec!(1000)).await;
    let placed = place(&app, &[(a, 2), (b, 1)], PaymentMethod::Wallet).await;
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(300));
    deliver(&app, &placed.order_id).await;

    let lifecycle = &app.state.services.lifecycle;
    let details = app
        .state
        .services
        .orders
        .get_for_user(app.user_id, &placed.order_id)
        .await
        .unwrap();
    let (a_id, b_id) = (item_id(&details, a), item_id(&details, b));

    let details = lifecycle
        .request_return(
            app.user_id,
            &placed.order_id,
            ReturnRequestInput {
                item_ids: vec![a_id, b_id],
                reason: "Damaged packaging".into(),
            },
        )
        .await
        .unwrap();
    assert!(details
        .items
        .iter()
        .all(|i| i.return_request_status == Some(ReturnRequestStatus::Pending)));

    let details = lifecycle
        .resolve_return(
            &placed.order_id,
            ResolveReturnInput {
                action: ReturnAction::Accept,
                item_ids: vec![a_id],
                rejected_item_ids: vec![],
                rejection_reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Delivered);
    assert_eq!(app.stock_of(a.variant_id).await, 5);
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(700));

    let details = lifecycle
        .resolve_return(
            &placed.order_id,
            ResolveReturnInput {
                action: ReturnAction::Accept,
                item_ids: vec![b_id],
                rejected_item_ids: vec![],
                rejection_reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Returned);
    assert_eq!(details.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(app.stock_of(b.variant_id).await, 5);
    // Returns refund item value only, not the delivery fee.
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(1000));
}

#[tokio::test]
async fn rejected_returns_need_a_reason_and_stay_rejected() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    let placed = place(&app, &[(item, 1)], PaymentMethod::Cod).await;
    deliver(&app, &placed.order_id).await;

    let lifecycle = &app.state.services.lifecycle;
    let details = app
        .state
        .services
        .orders
        .get_for_admin(&placed.order_id)
        .await
        .unwrap();
    let id = item_id(&details, item);
    let request = || ReturnRequestInput {
        item_ids: vec![id],
        reason: "Wrong strength".into(),
    };
    lifecycle
        .request_return(app.user_id, &placed.order_id, request())
        .await
        .unwrap();

    let err = lifecycle
        .resolve_return(
            &placed.order_id,
            ResolveReturnInput {
                action: ReturnAction::Reject,
                item_ids: vec![id],
                rejected_item_ids: vec![],
                rejection_reason: Some("  ".into()),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let details = lifecycle
        .resolve_return(
            &placed.order_id,
            ResolveReturnInput {
                action: ReturnAction::Reject,
                item_ids: vec![id],
                rejected_item_ids: vec![],
                rejection_reason: Some("Seal is broken".into()),
            },
        )
        .await
        .unwrap();
    let line = &details.items[0];
    assert_eq!(line.return_request_status, Some(ReturnRequestStatus::Rejected));
    assert_eq!(line.status, ItemStatus::Active);
    assert_eq!(details.order.order_status, OrderStatus::Delivered);
    assert_eq!(app.stock_of(item.variant_id).await, 4);

    let err = lifecycle
        .request_return(app.user_id, &placed.order_id, request())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn returns_close_after_the_window() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    let placed = place(&app, &[(item, 1)], PaymentMethod::Cod).await;

    let err = app
        .state
        .services
        .lifecycle
        .request_return(
            app.user_id,
            &placed.order_id,
            ReturnRequestInput {
                item_ids: vec![Uuid::new_v4()],
                reason: "Too early".into(),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(_));

    deliver(&app, &placed.order_id).await;
    Order::update_many()
        .col_expr(
            order::Column::DeliveredAt,
            Expr::value(Some(Utc::now() - Duration::days(15))),
        )
        .filter(order::Column::Id.eq(placed.id))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let details = app
        .state
        .services
        .orders
        .get_for_user(app.user_id, &placed.order_id)
        .await
        .unwrap();
    let err = app
        .state
        .services
        .lifecycle
        .request_return(
            app.user_id,
            &placed.order_id,
            ReturnRequestInput {
                item_ids: vec![details.items[0].id],
                reason: "Changed my mind".into(),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(_));

    let err = set_status(&app, &placed.order_id, OrderStatus::Returned)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(_));
}

#[tokio::test]
async fn admin_can_return_a_whole_delivered_order() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    let placed = place(&app, &[(item, 2)], PaymentMethod::Cod).await;
    deliver(&app, &placed.order_id).await;
    assert_eq!(app.stock_of(item.variant_id).await, 3);

    let details = set_status(&app, &placed.order_id, OrderStatus::Returned)
        .await
        .unwrap();
    assert_eq!(details.order.order_status, OrderStatus::Returned);
    assert!(details.items.iter().all(|i| i.status == ItemStatus::Returned));
    assert_eq!(app.stock_of(item.variant_id).await, 5);

    let listed = app
        .state
        .services
        .orders
        .list_for_user(app.user_id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}
