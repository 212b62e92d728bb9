mod common;

use assert_matches::assert_matches;
use common::{forged_proof, signed_proof, SeedVariant, TestApp};
use rust_decimal_macros::dec;
use rxcart_api::{
    entities::{
        commerce::{Direction, LedgerSource},
        IntentPurpose, PaymentMethod,
    },
    errors::ServiceError,
    services::{
        order_placement::{OrderedItemInput, PlaceOrderInput},
        wallet::{AddMoneyInput, TopUpIntentInput},
    },
};

fn add_money(order_id: &str, payment_id: &str) -> AddMoneyInput {
    AddMoneyInput {
        proof: signed_proof(order_id, payment_id),
    }
}

#[tokio::test]
async fn empty_wallet_is_created_on_first_read() {
    let app = TestApp::new().await;
    let wallet = app
        .state
        .services
        .wallet
        .get_wallet(app.user_id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, dec!(0));
    assert!(wallet.transactions.is_empty());
}

#[tokio::test]
async fn verified_top_up_is_credited_once() {
    let app = TestApp::new().await;
    let wallet = &app.state.services.wallet;
    app.open_intent(app.user_id, IntentPurpose::WalletTopUp, dec!(750), "order_W1")
        .await;

    let view = wallet
        .add_money(app.user_id, add_money("order_W1", "pay_W1"))
        .await
        .unwrap();
    assert_eq!(view.balance, dec!(750));
    assert_eq!(view.money_added, dec!(750));
    assert_eq!(view.total_credits, dec!(750));
    let entry = &view.transactions[0];
    assert_eq!(entry.direction, Direction::Credit);
    assert_eq!(entry.source, LedgerSource::AddMoney);
    assert_eq!(entry.external_transaction_id.as_deref(), Some("pay_W1"));

    let err = wallet
        .add_money(app.user_id, add_money("order_W1", "pay_W1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(750));
}

#[tokio::test]
async fn credited_amount_comes_from_the_intent() {
    let app = TestApp::new().await;
    app.open_intent(app.user_id, IntentPurpose::WalletTopUp, dec!(200), "order_W5")
        .await;

    // Clients may still send an amount; it is not what gets credited.
    let input: AddMoneyInput = serde_json::from_value(serde_json::json!({
        "amount": 1000000,
        "razorpay_order_id": "order_W5",
        "razorpay_payment_id": "pay_W5",
        "razorpay_signature": signed_proof("order_W5", "pay_W5").signature,
    }))
    .unwrap();
    let view = app
        .state
        .services
        .wallet
        .add_money(app.user_id, input)
        .await
        .unwrap();
    assert_eq!(view.balance, dec!(200));
}

#[tokio::test]
async fn order_payment_cannot_be_replayed_as_a_top_up() {
    let app = TestApp::new().await;
    let item = app.seed_item(SeedVariant::priced(dec!(400), 5)).await;
    app.put_in_cart(app.user_id, item, 1).await;
    let address_id = app.seed_address(app.user_id).await;
    let proof = app
        .order_payment(app.user_id, dec!(400), "order_X", "pay_X")
        .await;

    app.state
        .services
        .placement
        .place_order(
            app.user_id,
            PlaceOrderInput {
                address_id,
                payment_method: PaymentMethod::Upi,
                ordered_items: vec![OrderedItemInput {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: 1,
                }],
                coupon_id: None,
                payment: Some(proof.clone()),
            },
        )
        .await
        .unwrap();

    let wallet = &app.state.services.wallet;
    let err = wallet
        .add_money(app.user_id, AddMoneyInput { proof })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentVerificationFailed { .. });

    // Same payment id under a genuine top-up intent.
    app.open_intent(
        app.user_id,
        IntentPurpose::WalletTopUp,
        dec!(1000000),
        "order_T1",
    )
    .await;
    let err = wallet
        .add_money(app.user_id, add_money("order_T1", "pay_X"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(0));
}

#[tokio::test]
async fn unverified_or_invalid_top_ups_are_refused() {
    let app = TestApp::new().await;
    let wallet = &app.state.services.wallet;
    app.open_intent(app.user_id, IntentPurpose::WalletTopUp, dec!(100), "order_W2")
        .await;

    let err = wallet
        .add_money(
            app.user_id,
            AddMoneyInput {
                proof: forged_proof("order_W2", "pay_W2"),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentVerificationFailed { .. });

    let err = wallet
        .add_money(app.user_id, add_money("order_unknown", "pay_W3"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentVerificationFailed { .. });

    let err = wallet
        .create_top_up_intent(app.user_id, TopUpIntentInput { amount: dec!(0) })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(app.wallet_balance(app.user_id).await, dec!(0));
}
