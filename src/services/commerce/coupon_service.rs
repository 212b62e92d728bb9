use crate::entities::commerce::{
    coupon, coupon_usage, AppliedCoupon, Coupon, CouponModel, CouponStatus, CouponUsage,
};
use crate::errors::ServiceError;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Result of evaluating a coupon against an order subtotal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponEvaluation {
    pub code: String,
    pub status: CouponStatus,
    /// Discount that placement would grant, zero when not applicable
    pub discount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<AppliedCoupon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Default)]
pub struct CouponService;

impl CouponService {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon_id: Uuid,
    ) -> Result<CouponModel, ServiceError> {
        let coupon = Coupon::find_by_id(coupon_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".into()))?;
        self.refresh_status(conn, coupon).await
    }

    pub async fn find_by_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<CouponModel, ServiceError> {
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code.trim().to_uppercase()))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;
        self.refresh_status(conn, coupon).await
    }

    /// Persists the status derived from the validity window when it has drifted.
    pub async fn refresh_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon: CouponModel,
    ) -> Result<CouponModel, ServiceError> {
        let derived = coupon.derived_status(Utc::now());
        if derived == coupon.status {
            return Ok(coupon);
        }

        debug!(code = %coupon.code, from = ?coupon.status, to = ?derived, "correcting coupon status");
        let mut active: coupon::ActiveModel = coupon.into();
        active.status = Set(derived);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    /// Decides the discount a coupon grants on `subtotal` for `user_id`.
    ///
    /// Blocked coupons and exhausted per-user limits are errors. Coupons outside
    /// their window or below the minimum purchase simply grant nothing.
    #[instrument(skip(self, conn, coupon), fields(code = %coupon.code))]
    pub async fn evaluate<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon: &CouponModel,
        user_id: Uuid,
        subtotal: Decimal,
    ) -> Result<CouponEvaluation, ServiceError> {
        let not_applied = |reason: String| CouponEvaluation {
            code: coupon.code.clone(),
            status: coupon.status,
            discount: Decimal::ZERO,
            applied: None,
            reason: Some(reason),
        };

        match coupon.status {
            CouponStatus::Blocked => {
                return Err(ServiceError::PolicyViolation(format!(
                    "Coupon {} is blocked",
                    coupon.code
                )))
            }
            CouponStatus::Upcoming => {
                return Ok(not_applied("Coupon is not active yet".into()));
            }
            CouponStatus::Expired => return Ok(not_applied("Coupon has expired".into())),
            CouponStatus::Active => {}
        }

        if subtotal < coupon.min_purchase {
            return Ok(not_applied(format!(
                "Minimum purchase of {} required",
                coupon.min_purchase.normalize()
            )));
        }

        let used = self.usage_count(conn, coupon.id, user_id).await?;
        if used >= coupon.usage_limit {
            return Err(ServiceError::Conflict(format!(
                "Coupon {} has already been used the maximum number of times",
                coupon.code
            )));
        }

        let discount = coupon.discount.min(subtotal);
        Ok(CouponEvaluation {
            code: coupon.code.clone(),
            status: coupon.status,
            discount,
            applied: Some(AppliedCoupon {
                coupon_id: coupon.id,
                code: coupon.code.clone(),
                discount,
            }),
            reason: None,
        })
    }

    pub async fn usage_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon_id: Uuid,
        user_id: Uuid,
    ) -> Result<i32, ServiceError> {
        Ok(CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .filter(coupon_usage::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .map(|u| u.usage_count)
            .unwrap_or(0))
    }

    /// Increments the user's usage counter, refusing to pass `usage_limit`.
    pub async fn record_usage<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let coupon = Coupon::find_by_id(coupon_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".into()))?;

        let existing = CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .filter(coupon_usage::Column::UserId.eq(user_id))
            .one(conn)
            .await?;

        match existing {
            Some(usage) => {
                let result = CouponUsage::update_many()
                    .col_expr(
                        coupon_usage::Column::UsageCount,
                        Expr::col(coupon_usage::Column::UsageCount).add(1),
                    )
                    .filter(coupon_usage::Column::Id.eq(usage.id))
                    .filter(coupon_usage::Column::UsageCount.lt(coupon.usage_limit))
                    .exec(conn)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(ServiceError::Conflict(format!(
                        "Coupon {} has already been used the maximum number of times",
                        coupon.code
                    )));
                }
            }
            None => {
                if coupon.usage_limit < 1 {
                    return Err(ServiceError::Conflict(format!(
                        "Coupon {} cannot be used",
                        coupon.code
                    )));
                }
                coupon_usage::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    coupon_id: Set(coupon_id),
                    user_id: Set(user_id),
                    usage_count: Set(1),
                }
                .insert(conn)
                .await?;
            }
        }
        Ok(())
    }
}

/// Splits `discount` across lines in proportion to each line total.
///
/// Shares are rounded to cents and the last line absorbs the remainder, so the
/// shares always sum to exactly `discount`.
pub fn split_discount(line_totals: &[Decimal], discount: Decimal) -> Vec<Decimal> {
    let subtotal: Decimal = line_totals.iter().copied().sum();
    if line_totals.is_empty() || discount.is_zero() || subtotal.is_zero() {
        return vec![Decimal::ZERO; line_totals.len()];
    }

    let last = line_totals.len() - 1;
    let mut allocated = Decimal::ZERO;
    line_totals
        .iter()
        .enumerate()
        .map(|(idx, total)| {
            if idx == last {
                discount - allocated
            } else {
                let share = (discount * *total / subtotal)
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
                allocated += share;
                share
            }
        })
        .collect()
}
