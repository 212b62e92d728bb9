//! Stock and cart mutations shared by placement, retry and the order lifecycle.
//!
//! Stock is only ever changed through conditional `UPDATE`s, never read-then-write.

use crate::{
    entities::commerce::{cart_item, product_variant, CartItem, ProductVariant},
    errors::ServiceError,
    services::commerce::{cart_service::CartService, pricing_service::line_subtotal},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Takes `quantity` units of a variant, failing if fewer are in stock.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
    display_name: &str,
) -> Result<(), ServiceError> {
    let result = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::Stock,
            Expr::col(product_variant::Column::Stock).sub(quantity),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        counter!("stock_conflicts_total", 1);
        let available = ProductVariant::find_by_id(variant_id)
            .one(conn)
            .await?
            .map(|v| v.stock.max(0))
            .unwrap_or(0);
        warn!(%variant_id, quantity, available, "Stock decrement refused");
        return Err(ServiceError::InsufficientStock(format!(
            "Only {} left of {}, {} requested",
            available, display_name, quantity
        )));
    }
    Ok(())
}

/// Puts `quantity` units back on the shelf.
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Ok(());
    }
    ProductVariant::update_many()
        .col_expr(
            product_variant::Column::Stock,
            Expr::col(product_variant::Column::Stock).add(quantity),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .exec(conn)
        .await?;
    debug!(%variant_id, quantity, "Restored stock");
    Ok(())
}

/// An ordered quantity to take out of the shopper's cart.
#[derive(Debug, Clone, Copy)]
pub struct CartDeduction {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// Removes fully ordered lines and shrinks partially ordered ones, then
/// rewrites the cart total. Lines no longer in the cart are skipped.
pub async fn shrink_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    deductions: &[CartDeduction],
) -> Result<(), ServiceError> {
    let cart = CartService::get_or_create_cart(conn, user_id).await?;

    for deduction in deductions {
        let Some(item) = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(deduction.product_id))
            .filter(cart_item::Column::VariantId.eq(deduction.variant_id))
            .one(conn)
            .await?
        else {
            continue;
        };

        if item.quantity <= deduction.quantity {
            CartItem::delete_by_id(item.id).exec(conn).await?;
            continue;
        }

        let remaining = item.quantity - deduction.quantity;
        let unit = if item.quantity > 0 {
            item.subtotal / Decimal::from(item.quantity)
        } else {
            Decimal::ZERO
        };
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(remaining);
        active.subtotal = Set(line_subtotal(unit, remaining));
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
    }

    let items = CartService::cart_items(conn, cart.id).await?;
    CartService::store_total(conn, cart, &items).await
}
