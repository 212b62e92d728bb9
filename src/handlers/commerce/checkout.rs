use crate::handlers::common::{map_service_error, success_response};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::commerce::checkout_service::{CouponPreviewInput, GatewayIntentInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/validate", get(validate_checkout))
        .route("/coupon/preview", post(preview_coupon))
}

/// Orderable and unavailable cart lines with payable totals
async fn validate_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .services
        .checkout
        .validate(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(summary))
}

async fn preview_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CouponPreviewInput>,
) -> Result<impl IntoResponse, ApiError> {
    let preview = state
        .services
        .checkout
        .preview_coupon(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(preview))
}

/// Creates a gateway payment order for the current payable total
pub async fn create_gateway_intent(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Option<Json<GatewayIntentInput>>,
) -> Result<impl IntoResponse, ApiError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    let intent = state
        .services
        .checkout
        .create_gateway_intent(user.user_id, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(intent))
}
