use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::commerce::cart_service::{AddToCartInput, UpdateQuantityInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .route("/quantity", patch(update_quantity))
        .route("/item", delete(remove_item))
}

/// Reconciled cart view
async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .reconcile(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Add units of a variant. Anonymous callers get a 401, with the prescription
/// message when the variant is prescription-only.
async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    user: Option<AuthUser>,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let result = state
        .services
        .cart
        .add_item(user.map(|u| u.user_id), payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(result))
}

async fn update_quantity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<UpdateQuantityInput>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .services
        .cart
        .update_quantity(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(result))
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<RemoveItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_item(user.user_id, payload.product_id, payload.variant_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveItemRequest {
    product_id: Uuid,
    variant_id: Uuid,
}
