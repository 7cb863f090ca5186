//! Feria API Library
//!
//! Marketplace fulfillment engine for kiosk vendors selling perishable
//! goods in dated lots. Stock lives in batches consumed first-expired
//! first-out; checkout holds it, kiosks confirm, payment consumes it.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod services;

use axum::{response::Json, routing::get, Router};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Full v1 API surface
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(api_status))
        .nest("/batches", handlers::batches::batch_routes())
        .nest("/products", handlers::batches::product_stock_routes())
        .nest(
            "/stock-movements",
            handlers::stock_movements::stock_movement_routes(),
        )
        .nest("/reservations", handlers::reservations::reservation_routes())
        .nest("/orders", handlers::orders::order_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
}

async fn api_status() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");
    let git = option_env!("GIT_HASH").unwrap_or("unknown");
    Json(json!({
        "status": "ok",
        "version": version,
        "git": git,
        "service": "feria-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    }))
}
