use crate::{
    entities::order::{self, Entity as Order, Model as OrderModel},
    errors::ServiceError,
    services::order_status::{find_order, load_details, OrderDetails},
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Read side of orders.
#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        debug!(count = orders.len(), "Listed orders");
        Ok(orders)
    }

    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let order = find_order(&*self.db, order_number, Some(user_id)).await?;
        load_details(&*self.db, order.id).await
    }

    #[instrument(skip(self))]
    pub async fn get_for_admin(&self, order_ref: &str) -> Result<OrderDetails, ServiceError> {
        let order = find_order(&*self.db, order_ref, None).await?;
        load_details(&*self.db, order.id).await
    }
}
