//! Live catalog lookups shared by the cart, checkout and order engines.

use crate::entities::{
    commerce::{
        Brand, BrandModel, Category, CategoryModel, Product, ProductModel, ProductVariant,
        ProductVariantModel,
    },
    ProductSnapshot,
};
use crate::errors::ServiceError;
use crate::services::commerce::pricing_service::{resolve_price, PriceInputs, ResolvedPrice};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait};
use uuid::Uuid;

/// Why a cart line no longer refers to something purchasable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LineRejection {
    #[strum(serialize = "product no longer exists")]
    ProductMissing,
    #[strum(serialize = "brand is unlisted")]
    BrandUnlisted,
    #[strum(serialize = "category is unlisted")]
    CategoryUnlisted,
    #[strum(serialize = "variant no longer exists")]
    VariantMissing,
    #[strum(serialize = "variant is unlisted")]
    VariantUnlisted,
}

impl LineRejection {
    /// Error raised when a line is rejected during a mutating flow.
    pub fn into_error(self) -> ServiceError {
        match self {
            LineRejection::ProductMissing => ServiceError::NotFound("Product not found".into()),
            LineRejection::VariantMissing => ServiceError::NotFound("Variant not found".into()),
            other => ServiceError::Conflict(format!("Item is no longer available: {}", other)),
        }
    }
}

/// A product/variant pair with everything needed to price and snapshot it.
#[derive(Debug, Clone)]
pub struct CatalogLine {
    pub product: ProductModel,
    pub variant: ProductVariantModel,
    pub brand: BrandModel,
    pub category: CategoryModel,
}

impl CatalogLine {
    pub fn price(&self) -> ResolvedPrice {
        resolve_price(PriceInputs {
            regular_price: self.variant.regular_price,
            product_discount: self.variant.discount,
            product_discount_active: self.variant.discount_active,
            category_discount: self.category.discount,
            category_discount_active: self.category.discount_active,
        })
    }

    pub fn display_name(&self) -> String {
        let label = self.variant.label();
        if label.is_empty() {
            self.product.name.clone()
        } else {
            format!("{} ({})", self.product.name, label)
        }
    }

    pub fn first_image(&self) -> Option<String> {
        self.images().into_iter().next()
    }

    fn images(&self) -> Vec<String> {
        serde_json::from_value(self.variant.images.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self, price: &ResolvedPrice) -> ProductSnapshot {
        ProductSnapshot {
            product_name: self.product.name.clone(),
            brand_name: self.brand.name.clone(),
            category_name: self.category.name.clone(),
            variant_label: self.variant.label(),
            attributes: self.variant.attribute_map(),
            images: self.images(),
            regular_price: price.regular_price,
            discount_percent: price.effective_discount,
            discount_source: price.source.to_string(),
            requires_prescription: self.variant.requires_prescription,
        }
    }
}

/// Loads the live catalog state behind a cart or order line.
///
/// A variant that belongs to another product is treated as missing.
pub async fn resolve_line<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Uuid,
) -> Result<Result<CatalogLine, LineRejection>, DbErr> {
    let Some(product) = Product::find_by_id(product_id).one(conn).await? else {
        return Ok(Err(LineRejection::ProductMissing));
    };

    let brand = Brand::find_by_id(product.brand_id).one(conn).await?;
    let Some(brand) = brand.filter(|b| b.is_listed) else {
        return Ok(Err(LineRejection::BrandUnlisted));
    };

    let category = Category::find_by_id(product.category_id).one(conn).await?;
    let Some(category) = category.filter(|c| c.is_listed) else {
        return Ok(Err(LineRejection::CategoryUnlisted));
    };

    let variant = ProductVariant::find_by_id(variant_id)
        .one(conn)
        .await?
        .filter(|v| v.product_id == product.id);
    let Some(variant) = variant else {
        return Ok(Err(LineRejection::VariantMissing));
    };
    if !variant.is_listed {
        return Ok(Err(LineRejection::VariantUnlisted));
    }

    Ok(Ok(CatalogLine {
        product,
        variant,
        brand,
        category,
    }))
}
