//! StockRoute API Library
//!
//! Inventory and routing decision engine: converts historical demand into
//! forecasts, safety-stock and reorder policies, anomaly reports, and
//! capacity-respecting vehicle routes, consumed by an external dashboard
//! over JSON/HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod ml;
pub mod openapi;
pub mod request_id;
pub mod services;

use axum::{extract::State, response::Json, routing::get, routing::post, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub services: services::AppServices,
}

impl AppState {
    pub fn new(config: config::AppConfig) -> Self {
        let services = services::AppServices::new(&config.engine);
        Self { config, services }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::request_id::current_request_id()
                .map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::EngineError>;

/// The versioned API surface consumed by the dashboard
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        // Forecasting
        .route("/forecast", post(handlers::forecasting::generate_forecast))
        .route(
            "/forecast/train",
            post(handlers::forecasting::train_forecast_model),
        )
        .route("/forecast/models", get(handlers::forecasting::list_models))
        // Stock optimization
        .route(
            "/inventory/recommendations",
            post(handlers::inventory::stock_recommendations),
        )
        // Anomaly detection
        .route(
            "/anomalies/detect",
            post(handlers::anomalies::detect_anomalies),
        )
        // Route optimization
        .route("/routes/optimize", post(handlers::routing::optimize_routes))
        // Sales ingestion
        .route(
            "/ingestion/sales",
            post(handlers::ingestion::ingest_sales_csv),
        )
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "stockroute-api",
        "environment": state.config.environment,
        "trained_models": state.services.registry.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}
