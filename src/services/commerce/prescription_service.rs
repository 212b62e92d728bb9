use crate::entities::commerce::{
    prescription, Prescription, PrescriptionModel, PrescriptionStatus, ProductVariantModel,
};
use crate::errors::ServiceError;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Outcome of a passed prescription check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrescriptionClearance {
    /// Variant is sold over the counter
    NotRequired,
    /// Covered by a verified prescription with `remaining` units left
    Covered { prescription_id: Uuid, remaining: i32 },
}

/// Specific reason a prescription-gated request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrescriptionDenial {
    NoneFound,
    Pending,
    Rejected,
    Expired,
}

impl PrescriptionDenial {
    fn from_status(status: PrescriptionStatus) -> Self {
        match status {
            PrescriptionStatus::Pending => PrescriptionDenial::Pending,
            PrescriptionStatus::Rejected => PrescriptionDenial::Rejected,
            // A verified record reaching here is past its expiry date
            PrescriptionStatus::Expired | PrescriptionStatus::Verified => {
                PrescriptionDenial::Expired
            }
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            PrescriptionDenial::NoneFound => {
                "A verified prescription is required for this product. Please upload one."
            }
            PrescriptionDenial::Pending => "Your prescription is awaiting verification",
            PrescriptionDenial::Rejected => {
                "Your prescription was rejected. Please upload a new one."
            }
            PrescriptionDenial::Expired => {
                "Your prescription has expired. Please upload a new one."
            }
        }
    }
}

/// Prescription gate for prescription-only variants.
#[derive(Clone, Default)]
pub struct PrescriptionService;

impl PrescriptionService {
    pub fn new() -> Self {
        Self
    }

    /// Checks whether `user_id` may buy `requested` units of `variant`.
    ///
    /// Over-the-counter variants pass without a session. Gated variants need a
    /// verified, unexpired prescription for the exact product and variant with
    /// enough remaining quota.
    #[instrument(skip(self, conn, variant), fields(variant_id = %variant.id))]
    pub async fn check<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Option<Uuid>,
        variant: &ProductVariantModel,
        requested: i32,
    ) -> Result<PrescriptionClearance, ServiceError> {
        if !variant.requires_prescription {
            return Ok(PrescriptionClearance::NotRequired);
        }

        let user_id = user_id.ok_or_else(|| {
            ServiceError::Unauthorized("Please log in to buy prescription medicines".into())
        })?;

        let now = Utc::now();
        let Some(valid) =
            Self::find_valid(conn, user_id, variant.product_id, variant.id, now).await?
        else {
            let denial = self
                .denial_reason(conn, user_id, variant.product_id, variant.id, now)
                .await?;
            debug!(?denial, "prescription gate denied");
            return Err(ServiceError::PolicyViolation(denial.message().into()));
        };

        let remaining = valid.remaining();
        if remaining <= 0 {
            return Err(ServiceError::PolicyViolation(
                "Your prescription quota for this product is used up".into(),
            ));
        }
        if requested > remaining {
            return Err(ServiceError::PolicyViolation(format!(
                "Your prescription allows only {} more unit(s) of this product",
                remaining
            )));
        }

        Ok(PrescriptionClearance::Covered {
            prescription_id: valid.id,
            remaining,
        })
    }

    /// Debits `quantity` units from the newest valid prescription.
    ///
    /// The increment is conditional on `used_uom + quantity <= uom`, so concurrent
    /// orders cannot overdraw the quota.
    pub async fn consume<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        variant: &ProductVariantModel,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if !variant.requires_prescription {
            return Ok(());
        }

        let now = Utc::now();
        let Some(valid) =
            Self::find_valid(conn, user_id, variant.product_id, variant.id, now).await?
        else {
            let denial = self
                .denial_reason(conn, user_id, variant.product_id, variant.id, now)
                .await?;
            return Err(ServiceError::PolicyViolation(denial.message().into()));
        };

        let result = Prescription::update_many()
            .col_expr(
                prescription::Column::UsedUom,
                Expr::col(prescription::Column::UsedUom).add(quantity),
            )
            .filter(prescription::Column::Id.eq(valid.id))
            .filter(
                Expr::col(prescription::Column::UsedUom)
                    .lte(Expr::col(prescription::Column::Uom).sub(quantity)),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::PolicyViolation(format!(
                "Your prescription allows only {} more unit(s) of this product",
                valid.remaining().max(0)
            )));
        }
        Ok(())
    }

    async fn find_valid<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PrescriptionModel>, ServiceError> {
        Ok(Prescription::find()
            .filter(prescription::Column::UserId.eq(user_id))
            .filter(prescription::Column::ProductId.eq(product_id))
            .filter(prescription::Column::VariantId.eq(variant_id))
            .filter(prescription::Column::Status.eq(PrescriptionStatus::Verified))
            .filter(prescription::Column::ExpiryDate.gt(now))
            .order_by_desc(prescription::Column::CreatedAt)
            .one(conn)
            .await?)
    }

    /// Inspects the newest prescription of any status to explain a denial.
    /// Records found past their expiry date are corrected to `expired` on the way.
    async fn denial_reason<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PrescriptionDenial, ServiceError> {
        let latest = Prescription::find()
            .filter(prescription::Column::UserId.eq(user_id))
            .filter(prescription::Column::ProductId.eq(product_id))
            .filter(prescription::Column::VariantId.eq(variant_id))
            .order_by_desc(prescription::Column::CreatedAt)
            .one(conn)
            .await?;

        let Some(latest) = latest else {
            return Ok(PrescriptionDenial::NoneFound);
        };

        let effective = latest.effective_status(now);
        if effective != latest.status {
            let mut active: prescription::ActiveModel = latest.into();
            active.status = Set(effective);
            active.update(conn).await?;
        }

        Ok(PrescriptionDenial::from_status(effective))
    }
}
