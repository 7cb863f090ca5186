use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for batch endpoints
pub fn batch_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_batch))
        .route("/:batch_id", get(get_batch).delete(delete_batch))
        .route("/:batch_id/restock", post(restock_batch))
        .route("/:batch_id/manual-out", post(mark_manual_out))
        .route("/:batch_id/expire", post(expire_batch))
        .route("/:batch_id/movements", get(list_movements))
        .route("/:batch_id/ledger-check", get(ledger_check))
}

/// Product-scoped stock endpoints
pub fn product_stock_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:product_id/batches", get(list_product_batches))
        .route("/:product_id/availability", get(product_availability))
}

/// Register a new dated lot with its opening stock
async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let batch = state
        .services
        .batches
        .create_batch(
            payload.product_id,
            payload.production_date,
            payload.initial_quantity,
        )
        .await
        .map_err(map_service_error)?;

    Ok(created_response(batch))
}

/// Get a single batch
async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .services
        .batches
        .get_batch(batch_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(batch))
}

/// Add stock to an existing batch
async fn restock_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
    Json(payload): Json<RestockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let batch = state
        .services
        .batches
        .restock_batch(batch_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(batch))
}

/// Pull a batch from sale, writing off its remaining stock
async fn mark_manual_out(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .services
        .batches
        .mark_manual_out(batch_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(batch))
}

/// Force the expiry flow for a batch past its expiration date
async fn expire_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .batches
        .expire_batch(batch_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}

/// Soft-delete a depleted or expired batch
async fn delete_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .batches
        .delete_batch(batch_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Movement history for a batch, oldest first
async fn list_movements(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let movements = state
        .services
        .stock_movements
        .movements_for_batch(batch_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(movements))
}

/// Replay a batch's ledger against its stored quantity
async fn ledger_check(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let check = state
        .services
        .stock_movements
        .verify_ledger(batch_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(check))
}

/// All non-deleted batches of a product in selling order
async fn list_product_batches(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let batches = state
        .services
        .batches
        .list_for_product(product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(batches))
}

/// Sellable stock of a product broken down by lot
async fn product_availability(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let availability = state
        .services
        .batches
        .product_availability(product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(availability))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchRequest {
    pub product_id: Uuid,
    pub production_date: NaiveDate,
    #[validate(range(min = 1))]
    pub initial_quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestockRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}
