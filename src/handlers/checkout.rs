use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/:session_id", get(get_checkout_session))
        .route("/:session_id/begin-payment", post(begin_payment))
        .route("/:session_id/payment-success", post(payment_success))
        .route("/:session_id/cancel", post(cancel_session))
}

/// Start checkout from a cart: one order per vendor, stock held for every line
async fn start_checkout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .services
        .checkout
        .create_from_cart(payload.user_id, payload.cart_id)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(details))
}

/// Get a checkout session with its orders
async fn get_checkout_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .services
        .checkout
        .get_session(session_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

/// Freeze an all-accepted session for payment
async fn begin_payment(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .begin_payment(session_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

/// Settle a session after the payment gateway confirms
async fn payment_success(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<PaymentSuccessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .services
        .checkout
        .process_payment_success(session_id, payload.payment_info)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

/// Abandon an unpaid session, releasing every hold
async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .cancel_session(session_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct StartCheckoutRequest {
    pub user_id: Uuid,
    pub cart_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PaymentSuccessRequest {
    /// Opaque gateway metadata stored on each paid order.
    #[serde(default)]
    pub payment_info: serde_json::Value,
}
