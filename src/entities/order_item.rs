use super::order::Actor;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Order line. `final_price == total_price - discount_share`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_share: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub final_price: Decimal,
    /// `ProductSnapshot` frozen at placement
    #[sea_orm(column_type = "Json")]
    pub product_snapshot: Json,
    pub status: ItemStatus,
    #[sea_orm(nullable)]
    pub return_request_status: Option<ReturnRequestStatus>,
    #[sea_orm(nullable)]
    pub return_reason: Option<String>,
    #[sea_orm(nullable)]
    pub return_rejection_reason: Option<String>,
    #[sea_orm(nullable)]
    pub return_requested_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub returned_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub returned_by: Option<Actor>,
    #[sea_orm(nullable)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub cancelled_by: Option<Actor>,
    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn snapshot(&self) -> Option<ProductSnapshot> {
        serde_json::from_value(self.product_snapshot.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "returned")]
    Returned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum ReturnRequestStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "accepted")]
    Accepted,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Catalog data frozen into an order line. Holds values only, never live references,
/// so later catalog edits cannot change what the customer bought.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub product_name: String,
    pub brand_name: String,
    pub category_name: String,
    pub variant_label: String,
    pub attributes: BTreeMap<String, String>,
    pub images: Vec<String>,
    pub regular_price: Decimal,
    pub discount_percent: Decimal,
    pub discount_source: String,
    pub requires_prescription: bool,
}
