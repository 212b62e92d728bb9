use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Purchasable SKU of a product with its own price, discount and stock.
///
/// `stock` never goes negative: it is only decremented through a conditional
/// update guarded by `stock >= quantity`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub position: i32,
    pub quantity_received: i32,
    pub stock: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub regular_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    pub discount_active: bool,
    pub is_listed: bool,
    pub requires_prescription: bool,
    /// Dosage units per pack
    pub uom: i32,
    /// Free-form attributes such as strength or size
    #[sea_orm(column_type = "Json")]
    pub attributes: Json,
    #[sea_orm(column_type = "Json")]
    pub ingredients: Json,
    #[sea_orm(column_type = "Json")]
    pub images: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn attribute_map(&self) -> BTreeMap<String, String> {
        serde_json::from_value(self.attributes.clone()).unwrap_or_default()
    }

    /// Human label built from the attribute map, e.g. "size: 10 tablets, strength: 500mg".
    pub fn label(&self) -> String {
        self.attribute_map()
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
