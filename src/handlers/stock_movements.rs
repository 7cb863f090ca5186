use crate::entities::batch;
use crate::entities::stock_movement::{self, StockMovementType};
use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for stock movement endpoints
pub fn stock_movement_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(record_movement))
        .route("/direct-sale", post(direct_sale))
}

/// Record a manual movement against a batch
async fn record_movement(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RecordMovementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (batch, movement) = state
        .services
        .stock_movements
        .apply_movement(payload.batch_id, payload.movement_type, payload.delta)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(MovementResponse { batch, movement }))
}

/// Walk-up sale at the kiosk: consume stock FEFO without a reservation
async fn direct_sale(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DirectSaleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let touched = state
        .services
        .stock_movements
        .consume_stock(payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    let response: Vec<MovementResponse> = touched
        .into_iter()
        .map(|(batch, movement)| MovementResponse { batch, movement })
        .collect();
    Ok(created_response(response))
}

// Request/Response DTOs

#[derive(Debug, Deserialize)]
pub struct RecordMovementRequest {
    pub batch_id: Uuid,
    pub movement_type: StockMovementType,
    pub delta: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DirectSaleRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub batch: batch::Model,
    pub movement: stock_movement::Model,
}
