mod common;

use assert_matches::assert_matches;
use common::{forged_proof, SeedVariant, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rxcart_api::{
    entities::{
        commerce::{coupon_usage, product_variant, CartItem, CouponUsage, ProductVariant},
        order::{self, Entity as Order},
        OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    services::{
        order_placement::{FailedOrderInput, OrderedItemInput, PlaceOrderInput},
        payment_gateway::GatewayProof,
        payment_retry::RetryPaymentInput,
    },
};
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

struct FailedOrder {
    order_number: String,
    variant_id: Uuid,
    total_amount: Decimal,
}

/// Places a card order whose signature does not verify.
async fn failed_card_order(app: &TestApp, coupon: Option<Uuid>) -> FailedOrder {
    let item = app.seed_item(SeedVariant::priced(dec!(400), 4)).await;
    app.put_in_cart(app.user_id, item, 1).await;
    let address_id = app.seed_address(app.user_id).await;

    let err = app
        .state
        .services
        .placement
        .place_order(
            app.user_id,
            PlaceOrderInput {
                address_id,
                payment_method: PaymentMethod::Card,
                ordered_items: vec![OrderedItemInput {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: 1,
                }],
                coupon_id: coupon,
                payment: Some(forged_proof("order_R1", "pay_R1")),
            },
        )
        .await
        .unwrap_err();
    let order_number = assert_matches!(
        err,
        ServiceError::PaymentVerificationFailed { retry_order_id: Some(n), .. } => n
    );
    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(order_number.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    FailedOrder {
        order_number,
        variant_id: item.variant_id,
        total_amount: order.total_amount,
    }
}

fn retry_input(order_number: &str, proof: Option<GatewayProof>) -> RetryPaymentInput {
    RetryPaymentInput {
        order_id: order_number.to_string(),
        payment_method: None,
        payment: proof,
    }
}

#[tokio::test]
async fn declined_payment_leaves_inventory_untouched() {
    let app = TestApp::new().await;
    let coupon_id = app.seed_coupon("FIFTY", dec!(50), dec!(0), 1).await;
    let failed = failed_card_order(&app, Some(coupon_id)).await;

    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(failed.order_number.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.order_status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.discount, dec!(50));
    assert_eq!(order.total_amount, dec!(350));

    assert_eq!(app.stock_of(failed.variant_id).await, 4);
    assert_eq!(CartItem::find().count(&*app.state.db).await.unwrap(), 1);
    assert_eq!(CouponUsage::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn retry_with_valid_payment_confirms_the_order_once() {
    let app = TestApp::new().await;
    let coupon_id = app.seed_coupon("FIFTY", dec!(50), dec!(0), 1).await;
    let failed = failed_card_order(&app, Some(coupon_id)).await;
    let retry = &app.state.services.retry;
    let proof = app
        .order_payment(app.user_id, failed.total_amount, "order_R2", "pay_R2")
        .await;

    let confirmed = retry
        .retry(app.user_id, retry_input(&failed.order_number, Some(proof)))
        .await
        .unwrap();
    assert_eq!(confirmed.order_id, failed.order_number);
    assert_eq!(confirmed.order_status, OrderStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Completed);
    // Never re-priced.
    assert_eq!(confirmed.total_amount, dec!(350));

    let db = &*app.state.db;
    assert_eq!(app.stock_of(failed.variant_id).await, 3);
    assert_eq!(CartItem::find().count(db).await.unwrap(), 0);
    let usage = CouponUsage::find()
        .filter(coupon_usage::Column::CouponId.eq(coupon_id))
        .one(db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(usage.usage_count, 1);

    let order = Order::find_by_id(confirmed.id).one(db).await.unwrap().unwrap();
    assert_eq!(order.gateway_payment_id.as_deref(), Some("pay_R2"));
    assert!(order.failure_reason.is_none());

    let proof = app
        .order_payment(app.user_id, failed.total_amount, "order_R3", "pay_R3")
        .await;
    let err = retry
        .retry(app.user_id, retry_input(&failed.order_number, Some(proof)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(msg) if msg.contains("already processed"));
    assert_eq!(app.stock_of(failed.variant_id).await, 3);
}

#[tokio::test]
async fn retry_with_bad_signature_keeps_the_order_retryable() {
    let app = TestApp::new().await;
    let failed = failed_card_order(&app, None).await;

    let err = app
        .state
        .services
        .retry
        .retry(
            app.user_id,
            retry_input(&failed.order_number, Some(forged_proof("order_R2", "pay_R2"))),
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::PaymentVerificationFailed { retry_order_id: Some(ref n), .. } if *n == failed.order_number
    );

    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(failed.order_number.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(app.stock_of(failed.variant_id).await, 4);
}

#[tokio::test]
async fn retry_payment_must_cover_the_stored_total() {
    let app = TestApp::new().await;
    let failed = failed_card_order(&app, None).await;
    let proof = app
        .order_payment(app.user_id, dec!(1), "order_R2", "pay_R2")
        .await;

    let err = app
        .state
        .services
        .retry
        .retry(app.user_id, retry_input(&failed.order_number, Some(proof)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentVerificationFailed { .. });
    assert_eq!(app.stock_of(failed.variant_id).await, 4);
}

#[tokio::test]
async fn retry_rejects_a_payment_already_used_elsewhere() {
    let app = TestApp::new().await;
    let failed = failed_card_order(&app, None).await;

    let first = app
        .order_payment(app.user_id, failed.total_amount, "order_R2", "pay_R2")
        .await;
    app.state
        .services
        .retry
        .retry(app.user_id, retry_input(&failed.order_number, Some(first)))
        .await
        .unwrap();

    let other = failed_card_order(&app, None).await;
    let replay = app
        .order_payment(app.user_id, other.total_amount, "order_R4", "pay_R2")
        .await;
    let err = app
        .state
        .services
        .retry
        .retry(app.user_id, retry_input(&other.order_number, Some(replay)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(app.stock_of(other.variant_id).await, 4);
}

#[tokio::test]
async fn retry_fails_when_stock_was_sold_meanwhile() {
    let app = TestApp::new().await;
    let failed = failed_card_order(&app, None).await;

    ProductVariant::update_many()
        .col_expr(product_variant::Column::Stock, Expr::value(0))
        .filter(product_variant::Column::Id.eq(failed.variant_id))
        .exec(&*app.state.db)
        .await
        .unwrap();
    let proof = app
        .order_payment(app.user_id, failed.total_amount, "order_R2", "pay_R2")
        .await;

    let err = app
        .state
        .services
        .retry
        .retry(app.user_id, retry_input(&failed.order_number, Some(proof)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(failed.order_number.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.order_status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn retry_can_switch_to_wallet() {
    let app = TestApp::new().await;
    let failed = failed_card_order(&app, None).await;
    app.fund_wallet(app.user_id, dec!(1000)).await;

    let confirmed = app
        .state
        .services
        .retry
        .retry(
            app.user_id,
            RetryPaymentInput {
                order_id: failed.order_number.clone(),
                payment_method: Some(PaymentMethod::Wallet),
                payment: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.payment_status, PaymentStatus::Completed);
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(600));

    let order = Order::find_by_id(confirmed.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_method, PaymentMethod::Wallet);
}

#[tokio::test]
async fn other_users_cannot_retry_an_order() {
    let app = TestApp::new().await;
    let failed = failed_card_order(&app, None).await;
    let proof = app
        .order_payment(app.admin_id, failed.total_amount, "order_R2", "pay_R2")
        .await;

    let err = app
        .state
        .services
        .retry
        .retry(app.admin_id, retry_input(&failed.order_number, Some(proof)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn failed_order_can_be_recorded_explicitly() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(100), 0)).await;
    app.put_in_cart(app.user_id, item, 2).await;
    let address_id = app.seed_address(app.user_id).await;

    let shell = app
        .state
        .services
        .placement
        .record_failed_order(
            app.user_id,
            FailedOrderInput {
                order: PlaceOrderInput {
                    address_id,
                    payment_method: PaymentMethod::Upi,
                    ordered_items: vec![OrderedItemInput {
                        product_id: item.product_id,
                        variant_id: item.variant_id,
                        quantity: 2,
                    }],
                    coupon_id: None,
                    payment: None,
                },
                reason: Some("User closed the payment window".into()),
            },
        )
        .await
        .unwrap();

    // Stock is not checked for a shell.
    assert_eq!(shell.order_status, OrderStatus::Pending);
    assert_eq!(shell.payment_status, PaymentStatus::Failed);
    assert_eq!(shell.total_amount, dec!(250));
    assert_eq!(app.stock_of(item.variant_id).await, 0);

    let order = Order::find_by_id(shell.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        order.failure_reason.as_deref(),
        Some("User closed the payment window")
    );
}
