#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rxcart_api::{
    auth::{AuthService, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::{
        commerce::{
            address, brand, cart, cart_item, category, coupon, prescription, product,
            product_variant, wallet, Cart, CouponStatus, PrescriptionStatus, ProductVariant,
            Wallet,
        },
        payment_intent, IntentPurpose,
    },
    events::{self, EventSender},
    handlers::AppServices,
    services::payment_gateway::{compute_signature, GatewayProof, PaymentGateway, RazorpayGateway},
    AppState,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const GATEWAY_SECRET: &str = "gateway_test_secret";

/// Shape of a catalog variant seeded for a test.
#[derive(Debug, Clone)]
pub struct SeedVariant {
    pub price: Decimal,
    pub stock: i32,
    pub product_discount: Decimal,
    pub category_discount: Decimal,
    pub requires_prescription: bool,
}

impl SeedVariant {
    pub fn priced(price: Decimal, stock: i32) -> Self {
        Self {
            price,
            stock,
            product_discount: Decimal::ZERO,
            category_discount: Decimal::ZERO,
            requires_prescription: false,
        }
    }

    pub fn category_discount(mut self, percent: Decimal) -> Self {
        self.category_discount = percent;
        self
    }

    pub fn prescription_only(mut self) -> Self {
        self.requires_prescription = true;
        self
    }
}

/// Ids of a seeded product/variant pair.
#[derive(Debug, Clone, Copy)]
pub struct SeededItem {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub brand_id: Uuid,
    pub category_id: Uuid,
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub user_id: Uuid,
    pub admin_id: Uuid,
    user_token: String,
    admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_gateway_url("http://127.0.0.1:9").await
    }

    /// Same as [`TestApp::new`] with the payment gateway pointed at `base_url`.
    pub async fn with_gateway_url(base_url: &str) -> Self {
        // A single connection keeps the in-memory database alive and shared.
        Self::build("sqlite::memory:", 1, base_url).await
    }

    /// A database file served by a pool of `connections`, so transactions
    /// from concurrent requests interleave instead of queueing.
    pub async fn with_file_database(path: &std::path::Path, connections: u32) -> Self {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::build(&url, connections, "http://127.0.0.1:9").await
    }

    async fn build(database_url: &str, connections: u32, base_url: &str) -> Self {
        let mut cfg = AppConfig::new(
            database_url.to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        cfg.gateway_key_id = Some("rzp_test_key".to_string());
        cfg.gateway_key_secret = Some(GATEWAY_SECRET.to_string());
        cfg.gateway_base_url = base_url.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway: Arc<dyn PaymentGateway> = Arc::new(
            RazorpayGateway::new(
                cfg.gateway_base_url.clone(),
                cfg.gateway_key_id.clone(),
                cfg.gateway_key_secret.clone(),
            )
            .expect("gateway client"),
        );

        let auth = Arc::new(AuthService::new(JWT_SECRET));
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), gateway, &cfg);

        let state = Arc::new(AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth: auth.clone(),
        });

        let user_id = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let user_token = auth
            .issue_token(user_id, &[], Duration::hours(1))
            .expect("user token");
        let admin_token = auth
            .issue_token(admin_id, &[ADMIN_ROLE], Duration::hours(1))
            .expect("admin token");

        let router = rxcart_api::app_router(state.clone());

        Self {
            router,
            state,
            user_id,
            admin_id,
            user_token,
            admin_token,
            _event_task: event_task,
        }
    }

    pub fn user_token(&self) -> &str {
        &self.user_token
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    /// Send a prebuilt request against the router.
    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests made as the default shopper.
    pub async fn request_as_user(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, Some(self.user_token())).await;
        read_json(response).await
    }

    pub async fn request_as_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self
            .request(method, uri, body, Some(self.admin_token()))
            .await;
        read_json(response).await
    }

    /// Seeds a listed brand, category, product and variant.
    pub async fn seed_item(&self, seed: SeedVariant) -> SeededItem {
        let db = &*self.state.db;
        let now = Utc::now();

        let brand = brand::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Acme Pharma".to_string()),
            is_listed: Set(true),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed brand");

        let category = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Pain Relief".to_string()),
            is_listed: Set(true),
            discount: Set(seed.category_discount),
            discount_active: Set(!seed.category_discount.is_zero()),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed category");

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Paracetamol {}", seed.price)),
            description: Set(Some("Seeded for integration tests".to_string())),
            brand_id: Set(brand.id),
            category_id: Set(category.id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed product");

        let variant = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            position: Set(0),
            quantity_received: Set(seed.stock),
            stock: Set(seed.stock),
            regular_price: Set(seed.price),
            discount: Set(seed.product_discount),
            discount_active: Set(!seed.product_discount.is_zero()),
            is_listed: Set(true),
            requires_prescription: Set(seed.requires_prescription),
            uom: Set(10),
            attributes: Set(json!({"strength": "500mg"})),
            ingredients: Set(json!(["paracetamol"])),
            images: Set(json!(["https://cdn.example.com/p.png"])),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed variant");

        SeededItem {
            product_id: product.id,
            variant_id: variant.id,
            brand_id: brand.id,
            category_id: category.id,
        }
    }

    /// Puts a line in the user's cart directly, bypassing add-to-cart checks.
    pub async fn put_in_cart(&self, user_id: Uuid, item: SeededItem, quantity: i32) {
        let db = &*self.state.db;
        let now = Utc::now();
        let cart = match Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(db)
            .await
            .expect("load cart")
        {
            Some(cart) => cart,
            None => cart::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                total: Set(Decimal::ZERO),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(db)
            .await
            .expect("seed cart"),
        };

        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(item.product_id),
            variant_id: Set(item.variant_id),
            quantity: Set(quantity),
            subtotal: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed cart item");
    }

    pub async fn seed_address(&self, user_id: Uuid) -> Uuid {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            full_name: Set("Asha Rao".to_string()),
            phone: Set("+91 90000 00000".to_string()),
            line1: Set("12 MG Road".to_string()),
            line2: Set(None),
            city: Set("Bengaluru".to_string()),
            state: Set("KA".to_string()),
            postal_code: Set("560001".to_string()),
            country: Set("IN".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address")
        .id
    }

    pub async fn fund_wallet(&self, user_id: Uuid, balance: Decimal) {
        let now = Utc::now();
        wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            balance: Set(balance),
            total_credits: Set(balance),
            money_added: Set(balance),
            total_spent: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed wallet");
    }

    pub async fn wallet_balance(&self, user_id: Uuid) -> Decimal {
        Wallet::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(&*self.state.db)
            .await
            .expect("load wallet")
            .map(|w| w.balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount: Decimal,
        min_purchase: Decimal,
        usage_limit: i32,
    ) -> Uuid {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount: Set(discount),
            min_purchase: Set(min_purchase),
            usage_limit: Set(usage_limit),
            start_date: Set(now - Duration::days(1)),
            expiry_date: Set(now + Duration::days(30)),
            status: Set(CouponStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
        .id
    }

    pub async fn seed_prescription(
        &self,
        user_id: Uuid,
        item: SeededItem,
        uom: i32,
        status: PrescriptionStatus,
    ) -> Uuid {
        let now = Utc::now();
        prescription::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(item.product_id),
            variant_id: Set(item.variant_id),
            doctor_name: Set("Dr. Iyer".to_string()),
            patient_name: Set("Asha Rao".to_string()),
            image_urls: Set(json!(["https://cdn.example.com/rx.png"])),
            uom: Set(uom),
            used_uom: Set(0),
            status: Set(status),
            prescription_date: Set(now - Duration::days(2)),
            expiry_date: Set(now + Duration::days(60)),
            created_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed prescription")
        .id
    }

    /// Records an open gateway intent as if the gateway had created `gateway_order_id`.
    pub async fn open_intent(
        &self,
        user_id: Uuid,
        purpose: IntentPurpose,
        amount: Decimal,
        gateway_order_id: &str,
    ) {
        payment_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            gateway_order_id: Set(gateway_order_id.to_string()),
            user_id: Set(user_id),
            purpose: Set(purpose),
            amount: Set(amount),
            currency: Set("INR".to_string()),
            gateway_payment_id: Set(None),
            order_id: Set(None),
            consumed_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed payment intent");
    }

    /// A signed proof for a fresh order intent of `amount`.
    pub async fn order_payment(
        &self,
        user_id: Uuid,
        amount: Decimal,
        gateway_order_id: &str,
        gateway_payment_id: &str,
    ) -> GatewayProof {
        self.open_intent(user_id, IntentPurpose::Order, amount, gateway_order_id)
            .await;
        signed_proof(gateway_order_id, gateway_payment_id)
    }

    pub async fn stock_of(&self, variant_id: Uuid) -> i32 {
        ProductVariant::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// A gateway payment proof signed with the test secret.
pub fn signed_proof(order_id: &str, payment_id: &str) -> GatewayProof {
    GatewayProof {
        gateway_order_id: order_id.to_string(),
        gateway_payment_id: payment_id.to_string(),
        signature: compute_signature(GATEWAY_SECRET, order_id, payment_id),
    }
}

/// A gateway payment proof whose signature does not match.
pub fn forged_proof(order_id: &str, payment_id: &str) -> GatewayProof {
    GatewayProof {
        gateway_order_id: order_id.to_string(),
        gateway_payment_id: payment_id.to_string(),
        signature: compute_signature("not-the-secret", order_id, payment_id),
    }
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    };
    (status, value)
}
