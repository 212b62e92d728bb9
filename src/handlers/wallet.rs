use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::wallet::{AddMoneyInput, TopUpIntentInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn wallet_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_wallet))
        .route("/add-money", post(add_money))
        .route("/add-money/intent", post(create_top_up_intent))
}

/// Balance and ledger, newest entries first
async fn get_wallet(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = state
        .services
        .wallet
        .get_wallet(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(wallet))
}

/// Opens a gateway payment for a wallet top-up
async fn create_top_up_intent(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<TopUpIntentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let intent = state
        .services
        .wallet
        .create_top_up_intent(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(intent))
}

async fn add_money(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<AddMoneyInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let wallet = state
        .services
        .wallet
        .add_money(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(wallet))
}
