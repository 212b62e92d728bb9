mod common;

use assert_matches::assert_matches;
use common::{SeedVariant, TestApp};
use rust_decimal_macros::dec;
use rxcart_api::{
    entities::commerce::{brand, Brand, PrescriptionStatus},
    errors::ServiceError,
    services::commerce::cart_service::{AddToCartInput, QuantityAction, UpdateQuantityInput},
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

fn add(item: common::SeededItem, quantity: i32) -> AddToCartInput {
    AddToCartInput {
        product_id: item.product_id,
        variant_id: item.variant_id,
        quantity,
    }
}

#[tokio::test]
async fn add_merges_lines_and_reports_item_count() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let item = app.seed_item(SeedVariant::priced(dec!(120), 8)).await;

    let first = cart.add_item(Some(app.user_id), add(item, 2)).await.unwrap();
    assert_eq!(first.quantity, 2);
    assert_eq!(first.cart_item_count, 1);

    let second = cart.add_item(Some(app.user_id), add(item, 3)).await.unwrap();
    assert_eq!(second.quantity, 5);
    assert_eq!(second.cart_item_count, 1);

    let view = cart.reconcile(app.user_id).await.unwrap();
    assert_eq!(view.subtotal, dec!(600));
    assert_eq!(view.delivery_fee, dec!(0));
    assert_eq!(view.total, dec!(600));
}

#[tokio::test]
async fn add_rejects_quantity_beyond_line_limit_or_stock() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let scarce = app.seed_item(SeedVariant::priced(dec!(40), 2)).await;
    let plenty = app.seed_item(SeedVariant::priced(dec!(40), 100)).await;

    let err = cart.add_item(Some(app.user_id), add(scarce, 3)).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let err = cart.add_item(Some(app.user_id), add(plenty, 11)).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = cart.add_item(Some(app.user_id), add(plenty, 0)).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn prescription_gate_on_add() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let gated = app
        .seed_item(SeedVariant::priced(dec!(250), 20).prescription_only())
        .await;

    let err = cart.add_item(None, add(gated, 1)).await.unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(msg) if msg.contains("prescription"));

    let err = cart.add_item(Some(app.user_id), add(gated, 1)).await.unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(msg) if msg.contains("upload"));

    app.seed_prescription(app.user_id, gated, 3, PrescriptionStatus::Pending)
        .await;
    let err = cart.add_item(Some(app.user_id), add(gated, 1)).await.unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(msg) if msg.contains("awaiting"));

    app.seed_prescription(app.user_id, gated, 3, PrescriptionStatus::Verified)
        .await;
    let err = cart.add_item(Some(app.user_id), add(gated, 4)).await.unwrap_err();
    assert_matches!(err, ServiceError::PolicyViolation(_));

    let added = cart.add_item(Some(app.user_id), add(gated, 3)).await.unwrap();
    assert_eq!(added.quantity, 3);
}

#[tokio::test]
async fn reconcile_drops_unlisted_lines_and_flags_stock() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let kept = app.seed_item(SeedVariant::priced(dec!(100), 1)).await;
    let delisted = app.seed_item(SeedVariant::priced(dec!(80), 10)).await;
    app.put_in_cart(app.user_id, kept, 2).await;
    app.put_in_cart(app.user_id, delisted, 1).await;

    let brand = Brand::find_by_id(delisted.brand_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: brand::ActiveModel = brand.into();
    active.is_listed = Set(false);
    active.update(&*app.state.db).await.unwrap();

    let view = cart.reconcile(app.user_id).await.unwrap();
    assert_eq!(view.removed_items, 1);
    assert_eq!(view.items.len(), 1);
    let line = &view.items[0];
    assert_eq!(line.quantity, 2);
    assert!(line.stock_issue);
    assert!(view.has_stock_issues);
    assert_eq!(view.subtotal, dec!(200));
    assert_eq!(view.delivery_fee, dec!(50));
    assert_eq!(view.total, dec!(250));

    let again = cart.reconcile(app.user_id).await.unwrap();
    assert_eq!(again.removed_items, 0);
    assert_eq!(again.items.len(), 1);
}

#[tokio::test]
async fn quantity_changes_keep_zero_lines_until_removed() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let item = app.seed_item(SeedVariant::priced(dec!(75), 2)).await;
    cart.add_item(Some(app.user_id), add(item, 1)).await.unwrap();

    let change = |action| UpdateQuantityInput {
        product_id: item.product_id,
        variant_id: item.variant_id,
        action,
    };

    let up = cart
        .update_quantity(app.user_id, change(QuantityAction::Increment))
        .await
        .unwrap();
    assert_eq!(up.quantity, 2);
    assert_eq!(up.subtotal, dec!(150));

    let err = cart
        .update_quantity(app.user_id, change(QuantityAction::Increment))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    cart.update_quantity(app.user_id, change(QuantityAction::Decrement))
        .await
        .unwrap();
    let zero = cart
        .update_quantity(app.user_id, change(QuantityAction::Decrement))
        .await
        .unwrap();
    assert_eq!(zero.quantity, 0);
    assert_eq!(zero.subtotal, dec!(0));
    assert_eq!(zero.cart.items.len(), 1);
    assert_eq!(zero.cart.subtotal, dec!(0));
    assert_eq!(zero.cart.delivery_fee, dec!(0));

    let view = cart
        .remove_item(app.user_id, item.product_id, item.variant_id)
        .await
        .unwrap();
    assert!(view.items.is_empty());

    let err = cart
        .remove_item(app.user_id, item.product_id, item.variant_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
