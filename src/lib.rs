//! rxcart API library
//!
//! Cart, checkout, order placement and order lifecycle for an online pharmacy
//! storefront with prescription-gated products.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod telemetry;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::AuthService;
use crate::events::EventSender;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

/// Versioned API surface.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/cart", handlers::commerce::carts_routes())
        .nest("/checkout", handlers::commerce::checkout_routes())
        .nest("/order", handlers::orders::order_routes())
        .nest("/orders", handlers::orders::customer_order_routes())
        .nest("/wallet", handlers::wallet::wallet_routes())
        .nest("/admin/order", handlers::admin_orders::admin_order_routes())
}

/// Full application router with tracing and request-id propagation applied.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http().make_span_with(telemetry::RequestSpanMaker))
        .layer(axum::middleware::from_fn(telemetry::propagate_request_id))
        .with_state(state)
}
