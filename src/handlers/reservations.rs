use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for reservation endpoints. Reservations are written
/// by checkout and the sweeps; over HTTP they are read-only.
pub fn reservation_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:reservation_id", get(get_reservation))
}

/// Get a single stock hold
async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let reservation = state
        .services
        .reservations
        .get_reservation(reservation_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(reservation))
}
