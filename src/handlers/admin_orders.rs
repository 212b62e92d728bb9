use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::AdminUser,
    errors::ApiError,
    services::order_status::{ResolveReturnInput, UpdateStatusInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, patch},
    Router,
};
use std::sync::Arc;
use tracing::info;

/// Admin order endpoints. `:id` accepts an order UUID or an order number.
pub fn admin_order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_order))
        .route("/:id/status", patch(update_status))
        .route("/:id/return", patch(resolve_return))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .services
        .orders
        .get_for_admin(&id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    info!(admin_id = %admin.user_id, order = %id, status = %payload.order_status, "Admin status update");

    let details = state
        .services
        .lifecycle
        .update_status(&id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

async fn resolve_return(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(payload): Json<ResolveReturnInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    info!(admin_id = %admin.user_id, order = %id, action = ?payload.action, "Admin return resolution");

    let details = state
        .services
        .lifecycle
        .resolve_return(&id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}
