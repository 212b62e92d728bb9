use crate::{
    config::CommercePolicy,
    entities::commerce::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel},
    errors::ServiceError,
    services::commerce::{
        catalog::{resolve_line, CatalogLine},
        pricing_service::{line_subtotal, DiscountSource},
        prescription_service::PrescriptionService,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Shopping cart service.
///
/// Carts hold live catalog references only. Every read reconciles them against
/// the catalog: lines pointing at unlisted or deleted items are dropped, prices
/// are recomputed through the pricing resolver and lines asking for more than
/// the live stock are flagged rather than truncated.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    prescriptions: PrescriptionService,
    policy: CommercePolicy,
}

/// One reconciled cart line as shown to the shopper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub brand_name: String,
    pub variant_label: String,
    pub image: Option<String>,
    pub quantity: i32,
    pub regular_price: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub discount_source: DiscountSource,
    pub subtotal: Decimal,
    pub stock: i32,
    pub stock_issue: bool,
    pub requires_prescription: bool,
}

/// Reconciled cart with derived totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartLineView>,
    /// Sum of line subtotals before the delivery fee
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub item_count: usize,
    pub has_stock_issues: bool,
    /// Lines dropped during this reconciliation
    pub removed_items: usize,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityAction {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuantityInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub action: QuantityAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartResult {
    pub quantity: i32,
    pub cart_item_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityUpdateResult {
    pub quantity: i32,
    pub subtotal: Decimal,
    pub cart: CartView,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        prescriptions: PrescriptionService,
        policy: CommercePolicy,
    ) -> Self {
        Self {
            db,
            prescriptions,
            policy,
        }
    }

    /// Loads the user's cart, creating an empty one on first access.
    pub async fn get_or_create_cart<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        {
            return Ok(cart);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            total: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        info!(%user_id, cart_id = %cart.id, "Created cart");
        Ok(cart)
    }

    pub async fn cart_items<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<CartItemModel>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Reconciles the cart against the live catalog.
    ///
    /// Writes only when a line had to be dropped; price and stock-flag
    /// recomputation is display-only.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db;
        let cart = Self::get_or_create_cart(db, user_id).await?;
        let items = Self::cart_items(db, cart.id).await?;

        let mut lines = Vec::with_capacity(items.len());
        let mut dropped = Vec::new();
        for item in items {
            match resolve_line(db, item.product_id, item.variant_id).await? {
                Ok(catalog) => lines.push(line_view(&item, &catalog)),
                Err(reason) => {
                    warn!(item_id = %item.id, %reason, "Dropping cart line");
                    dropped.push(item.id);
                }
            }
        }

        let view = self.build_view(&cart, lines, dropped.len());

        if !dropped.is_empty() {
            CartItem::delete_many()
                .filter(cart_item::Column::Id.is_in(dropped))
                .exec(db)
                .await?;
            let mut active: cart::ActiveModel = cart.into();
            active.total = Set(view.subtotal);
            active.updated_at = Set(Utc::now());
            active.update(db).await?;
        }

        Ok(view)
    }

    fn build_view(&self, cart: &CartModel, items: Vec<CartLineView>, removed: usize) -> CartView {
        let subtotal: Decimal = items.iter().map(|l| l.subtotal).sum();
        let delivery_fee = self.policy.delivery_fee_for(subtotal);
        CartView {
            cart_id: cart.id,
            has_stock_issues: items.iter().any(|l| l.stock_issue),
            item_count: items.len(),
            subtotal,
            delivery_fee,
            total: subtotal + delivery_fee,
            items,
            removed_items: removed,
        }
    }

    /// Adds units of a variant to the cart, merging with an existing line.
    ///
    /// Prescription-gated variants require a session; other variants still need
    /// one because carts are per user.
    #[instrument(skip(self, input), fields(variant_id = %input.variant_id))]
    pub async fn add_item(
        &self,
        user_id: Option<Uuid>,
        input: AddToCartInput,
    ) -> Result<AddToCartResult, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let catalog = resolve_line(db, input.product_id, input.variant_id)
            .await?
            .map_err(|reason| {
                ServiceError::ValidationError(format!("Cannot add item: {}", reason))
            })?;

        let Some(user_id) = user_id else {
            // Gated variants get the prescription-specific 401
            self.prescriptions
                .check(db, None, &catalog.variant, input.quantity)
                .await?;
            return Err(ServiceError::Unauthorized(
                "Please log in to add items to your cart".into(),
            ));
        };
        let cart = Self::get_or_create_cart(db, user_id).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(input.variant_id))
            .one(db)
            .await?;

        let new_quantity = existing.as_ref().map(|i| i.quantity).unwrap_or(0) + input.quantity;
        self.ensure_line_quantity(&catalog, new_quantity)?;
        self.prescriptions
            .check(db, Some(user_id), &catalog.variant, new_quantity)
            .await?;

        let unit_price = catalog.price().unit_price;
        let now = Utc::now();
        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(new_quantity);
                active.subtotal = Set(line_subtotal(unit_price, new_quantity));
                active.updated_at = Set(now);
                active.update(db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(input.product_id),
                    variant_id: Set(input.variant_id),
                    quantity: Set(new_quantity),
                    subtotal: Set(line_subtotal(unit_price, new_quantity)),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await?;
            }
        }

        let items = Self::cart_items(db, cart.id).await?;
        Self::store_total(db, cart, &items).await?;

        info!(cart_item_count = items.len(), quantity = new_quantity, "Added item to cart");
        Ok(AddToCartResult {
            quantity: new_quantity,
            cart_item_count: items.len(),
        })
    }

    /// Increments or decrements a line by one unit.
    ///
    /// Decrementing to zero keeps the line as a zero-quantity placeholder until
    /// it is removed explicitly.
    #[instrument(skip(self, input), fields(variant_id = %input.variant_id))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        input: UpdateQuantityInput,
    ) -> Result<QuantityUpdateResult, ServiceError> {
        let db = &*self.db;
        let cart = Self::get_or_create_cart(db, user_id).await?;
        let item = self
            .find_line(db, cart.id, input.product_id, input.variant_id)
            .await?;

        let catalog = resolve_line(db, item.product_id, item.variant_id)
            .await?
            .map_err(|reason| ServiceError::Conflict(format!("Item is unavailable: {}", reason)))?;

        let new_quantity = match input.action {
            QuantityAction::Increment => {
                let q = item.quantity + 1;
                self.ensure_line_quantity(&catalog, q)?;
                self.prescriptions
                    .check(db, Some(user_id), &catalog.variant, q)
                    .await?;
                q
            }
            QuantityAction::Decrement => (item.quantity - 1).max(0),
        };

        let subtotal = line_subtotal(catalog.price().unit_price, new_quantity);
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(new_quantity);
        active.subtotal = Set(subtotal);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        let items = Self::cart_items(db, cart.id).await?;
        Self::store_total(db, cart, &items).await?;

        Ok(QuantityUpdateResult {
            quantity: new_quantity,
            subtotal,
            cart: self.reconcile(user_id).await?,
        })
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let db = &*self.db;
        let cart = Self::get_or_create_cart(db, user_id).await?;
        let item = self.find_line(db, cart.id, product_id, variant_id).await?;
        CartItem::delete_by_id(item.id).exec(db).await?;

        let items = Self::cart_items(db, cart.id).await?;
        Self::store_total(db, cart, &items).await?;

        info!(%user_id, %variant_id, "Removed item from cart");
        self.reconcile(user_id).await
    }

    async fn find_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Item not found in cart".into()))
    }

    fn ensure_line_quantity(&self, catalog: &CatalogLine, quantity: i32) -> Result<(), ServiceError> {
        let max = self.policy.max_quantity_per_line;
        if quantity > max {
            return Err(ServiceError::ValidationError(format!(
                "You can add at most {} units of an item",
                max
            )));
        }
        if catalog.variant.stock < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} left of {}",
                catalog.variant.stock.max(0),
                catalog.display_name()
            )));
        }
        Ok(())
    }

    /// Rewrites the cached cart total from stored line subtotals.
    pub async fn store_total<C: ConnectionTrait>(
        conn: &C,
        cart: CartModel,
        items: &[CartItemModel],
    ) -> Result<(), ServiceError> {
        let total: Decimal = items.iter().map(|i| i.subtotal).sum();
        let mut active: cart::ActiveModel = cart.into();
        active.total = Set(total);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        Ok(())
    }
}

fn line_view(item: &CartItemModel, catalog: &CatalogLine) -> CartLineView {
    let price = catalog.price();
    CartLineView {
        item_id: item.id,
        product_id: item.product_id,
        variant_id: item.variant_id,
        product_name: catalog.product.name.clone(),
        brand_name: catalog.brand.name.clone(),
        variant_label: catalog.variant.label(),
        image: catalog.first_image(),
        quantity: item.quantity,
        regular_price: price.regular_price,
        unit_price: price.unit_price,
        discount_percent: price.effective_discount,
        discount_source: price.source,
        subtotal: line_subtotal(price.unit_price, item.quantity),
        stock: catalog.variant.stock,
        stock_issue: catalog.variant.stock < item.quantity,
        requires_prescription: catalog.variant.requires_prescription,
    }
}
