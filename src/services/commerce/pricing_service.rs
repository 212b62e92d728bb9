//! Effective-discount resolution for catalog prices.
//!
//! A variant carries its own discount and inherits its category's discount; only the
//! larger active one applies. Everything here is pure so cart display, checkout and
//! order placement always agree on a unit price.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Where the effective discount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiscountSource {
    Product,
    Category,
    None,
}

/// Inputs of a price resolution. Callers sanitize negative values beforehand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceInputs {
    pub regular_price: Decimal,
    pub product_discount: Decimal,
    pub product_discount_active: bool,
    pub category_discount: Decimal,
    pub category_discount_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPrice {
    pub regular_price: Decimal,
    pub effective_discount: Decimal,
    pub source: DiscountSource,
    pub unit_price: Decimal,
}

/// Rounds a money amount to whole currency units, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

pub fn resolve_price(inputs: PriceInputs) -> ResolvedPrice {
    let product = if inputs.product_discount_active {
        inputs.product_discount
    } else {
        Decimal::ZERO
    };
    let category = if inputs.category_discount_active {
        inputs.category_discount
    } else {
        Decimal::ZERO
    };

    let (effective_discount, source) = if product.is_zero() && category.is_zero() {
        (Decimal::ZERO, DiscountSource::None)
    } else if product >= category {
        (product, DiscountSource::Product)
    } else {
        (category, DiscountSource::Category)
    };

    let unit_price = round_money(
        inputs.regular_price * (Decimal::ONE - effective_discount / Decimal::ONE_HUNDRED),
    );

    ResolvedPrice {
        regular_price: inputs.regular_price,
        effective_discount,
        source,
        unit_price,
    }
}

/// Line subtotal as shown in the cart: `round(price * quantity)`, zero for empty lines.
pub fn line_subtotal(unit_price: Decimal, quantity: i32) -> Decimal {
    if quantity <= 0 {
        return Decimal::ZERO;
    }
    round_money(unit_price * Decimal::from(quantity))
}
