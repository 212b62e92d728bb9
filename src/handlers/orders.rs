use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::{
        order_placement::{FailedOrderInput, PlaceOrderInput},
        order_status::{CancelInput, ReturnRequestInput},
        payment_retry::{RetryIntentInput, RetryPaymentInput},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Placement and retry endpoints under `/order`
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/place", post(place_order))
        .route("/place-failed", post(place_failed_order))
        .route("/retry", post(retry_payment))
        .route("/retry/gateway-intent", post(create_retry_intent))
        .route(
            "/gateway-intent",
            post(super::commerce::checkout::create_gateway_intent),
        )
}

/// Customer order endpoints under `/orders`
pub fn customer_order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:order_number", get(get_order))
        .route("/:order_number/cancel", post(cancel_order))
        .route("/:order_number/items/:item_id/cancel", post(cancel_item))
        .route("/:order_number/return", post(request_return))
}

/// Places an order from the authenticated user's cart
async fn place_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<PlaceOrderInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let placed = state
        .services
        .placement
        .place_order(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(placed))
}

/// Records a pending/failed order shell after a client-side payment failure
async fn place_failed_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<FailedOrderInput>,
) -> Result<impl IntoResponse, ApiError> {
    let placed = state
        .services
        .placement
        .record_failed_order(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(placed))
}

async fn retry_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<RetryPaymentInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let confirmed = state
        .services
        .retry
        .retry(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(confirmed))
}

/// Creates a gateway payment order for the total of a failed order
async fn create_retry_intent(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<RetryIntentInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let intent = state
        .services
        .retry
        .create_gateway_intent(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(intent))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_for_user(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .services
        .orders
        .get_for_user(user.user_id, &order_number)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

/// Cancels the whole order while it has not shipped
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_number): Path<String>,
    payload: Option<Json<CancelInput>>,
) -> Result<impl IntoResponse, ApiError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    let details = state
        .services
        .lifecycle
        .cancel_order(user.user_id, &order_number, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

async fn cancel_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((order_number, item_id)): Path<(String, Uuid)>,
    payload: Option<Json<CancelInput>>,
) -> Result<impl IntoResponse, ApiError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    let details = state
        .services
        .lifecycle
        .cancel_item(user.user_id, &order_number, item_id, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

async fn request_return(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_number): Path<String>,
    Json(payload): Json<ReturnRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let details = state
        .services
        .lifecycle
        .request_return(user.user_id, &order_number, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}
