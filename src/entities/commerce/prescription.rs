use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Doctor's prescription authorizing `uom` dosage units of one product variant.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "prescriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub doctor_name: String,
    pub patient_name: String,
    #[sea_orm(column_type = "Json")]
    pub image_urls: Json,
    pub uom: i32,
    /// Units already consumed by orders; never exceeds `uom`
    pub used_uom: i32,
    pub status: PrescriptionStatus,
    pub prescription_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn remaining(&self) -> i32 {
        self.uom - self.used_uom
    }

    /// Status as of `now`: anything past its expiry date reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PrescriptionStatus {
        if self.expiry_date <= now {
            PrescriptionStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PrescriptionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "verified")]
    Verified,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "expired")]
    Expired,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
