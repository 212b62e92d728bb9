pub mod admin_orders;
pub mod commerce;
pub mod common;
pub mod health;
pub mod orders;
pub mod wallet;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    commerce::{CartService, CheckoutService, CouponService, PrescriptionService},
    order_placement::OrderPlacementService,
    order_status::OrderLifecycleService,
    orders::OrderQueryService,
    payment_gateway::PaymentGateway,
    payment_retry::PaymentRetryService,
    wallet::WalletService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub placement: Arc<OrderPlacementService>,
    pub retry: Arc<PaymentRetryService>,
    pub lifecycle: Arc<OrderLifecycleService>,
    pub orders: Arc<OrderQueryService>,
    pub wallet: Arc<WalletService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let policy = config.commerce.clone();
        let coupons = CouponService::new();
        let prescriptions = PrescriptionService::new();

        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            prescriptions.clone(),
            policy.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            coupons.clone(),
            gateway.clone(),
            policy.clone(),
            config.currency.clone(),
        ));
        let placement = Arc::new(OrderPlacementService::new(
            db_pool.clone(),
            event_sender.clone(),
            coupons.clone(),
            prescriptions.clone(),
            gateway.clone(),
            policy.clone(),
        ));
        let retry = Arc::new(PaymentRetryService::new(
            db_pool.clone(),
            event_sender.clone(),
            coupons,
            prescriptions,
            gateway.clone(),
            policy.clone(),
            config.currency.clone(),
        ));
        let lifecycle = Arc::new(OrderLifecycleService::new(
            db_pool.clone(),
            event_sender.clone(),
            policy,
        ));
        let orders = Arc::new(OrderQueryService::new(db_pool.clone()));
        let wallet = Arc::new(WalletService::new(
            db_pool,
            event_sender,
            gateway,
            config.currency.clone(),
        ));

        Self {
            cart,
            checkout,
            placement,
            retry,
            lifecycle,
            orders,
            wallet,
        }
    }
}
