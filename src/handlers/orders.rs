use crate::entities::order::OrderStatus;
use crate::handlers::common::{map_service_error, success_response};
use crate::{
    errors::{ApiError, ServiceError},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

fn map_status_str(status: &str) -> Result<OrderStatus, ServiceError> {
    match status.to_ascii_uppercase().as_str() {
        "PENDING_KIOSK_CONFIRMATION" | "PENDING" => Ok(OrderStatus::PendingKioskConfirmation),
        "ACCEPTED" => Ok(OrderStatus::Accepted),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "READY_FOR_PAYMENT" => Ok(OrderStatus::ReadyForPayment),
        "PAID" => Ok(OrderStatus::Paid),
        "CANCEL_REQUESTED" => Ok(OrderStatus::CancelRequested),
        "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
        "AUTO_REJECTED_TIMEOUT" => Ok(OrderStatus::AutoRejectedTimeout),
        other => Err(ServiceError::InvalidStatus(format!(
            "Unknown order status: {other}"
        ))),
    }
}

/// Creates the router for order endpoints
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:order_id", get(get_order))
        .route("/:order_id/reservations", get(list_order_reservations))
        .route("/:order_id/accept", post(accept_order))
        .route("/:order_id/reject", post(reject_order))
        .route("/:order_id/ready-for-payment", post(mark_ready_for_payment))
        .route("/:order_id/pay", post(mark_paid))
        .route("/:order_id/cancel", post(cancel_order))
        .route("/:order_id/request-cancellation", post(request_cancellation))
        .route(
            "/:order_id/finalize-cancellation",
            post(finalize_cancellation),
        )
        .route("/kiosk/:kiosk_user_id", get(list_kiosk_orders))
        .route("/user/:user_id", get(list_user_orders))
}

/// Get an order with its line items
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .services
        .orders
        .get_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(details))
}

/// Stock holds backing an order, any status
async fn list_order_reservations(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let reservations = state
        .services
        .reservations
        .list_for_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(reservations))
}

/// Kiosk accepts a pending order, restarting the hold clock
async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .accept_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Kiosk rejects a pending order, releasing its holds
async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .reject_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Move an accepted order to READY_FOR_PAYMENT with a payment deadline
async fn mark_ready_for_payment(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<MarkReadyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let expires_at = payload
        .expires_at
        .unwrap_or_else(|| Utc::now() + state.config.payment_window());
    let order = state
        .services
        .orders
        .mark_ready_for_payment(order_id, expires_at)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Mark a single order paid outside of a session settlement
async fn mark_paid(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<MarkPaidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .mark_paid(order_id, payload.payment_info)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Cancel a pre-payment order, releasing its holds
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .cancel_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Buyer asks to cancel a paid order; stock stays consumed
async fn request_cancellation(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .request_cancellation(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Vendor resolves a cancellation request
async fn finalize_cancellation(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .finalize_cancellation(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Orders addressed to a kiosk, newest first
async fn list_kiosk_orders(
    State(state): State<Arc<AppState>>,
    Path(kiosk_user_id): Path<i64>,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(map_status_str)
        .transpose()
        .map_err(map_service_error)?;
    let list = state
        .services
        .orders
        .list_for_kiosk(
            kiosk_user_id,
            status,
            params.page.unwrap_or(1),
            params.per_page.unwrap_or(20),
        )
        .await
        .map_err(map_service_error)?;

    Ok(success_response(list))
}

/// Orders placed by a buyer, newest first
async fn list_user_orders(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(map_status_str)
        .transpose()
        .map_err(map_service_error)?;
    let list = state
        .services
        .orders
        .list_for_user(
            user_id,
            status,
            params.page.unwrap_or(1),
            params.per_page.unwrap_or(20),
        )
        .await
        .map_err(map_service_error)?;

    Ok(success_response(list))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadyRequest {
    /// Payment deadline; defaults to now plus the configured payment window.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MarkPaidRequest {
    pub payment_info: Option<serde_json::Value>,
}
