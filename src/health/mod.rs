/*!
 * # Health Check Module
 *
 * Endpoints for monitoring the engine:
 *
 * - Basic health check (`/health`) - Simple up/down status
 * - Liveness check (`/health/live`) - Process is alive, with uptime
 * - Readiness check (`/health/ready`) - Ready to accept traffic
 * - Version info (`/health/version`) - Build information
 */

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::ml::registry::ModelRegistry;
use crate::services::sales_data::SalesStore;

/// Health check state
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<ModelRegistry>,
    pub sales: Arc<SalesStore>,
    pub start_time: SystemTime,
}

impl HealthState {
    pub fn new(registry: Arc<ModelRegistry>, sales: Arc<SalesStore>) -> Self {
        Self {
            registry,
            sales,
            start_time: SystemTime::now(),
        }
    }

    pub fn uptime(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or(Duration::from_secs(0))
            .as_secs()
    }
}

/// Returns build and version information
pub async fn version_info() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_HASH").unwrap_or("unknown"),
        "built": option_env!("BUILD_TIME").unwrap_or("unknown"),
    }))
}

/// Basic health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "up",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Liveness check endpoint
pub async fn liveness_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "uptime_seconds": state.uptime(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Readiness check endpoint. The engine holds all state in process, so
/// readiness reports the registry and store sizes rather than probing
/// external systems.
pub async fn readiness_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ready": true,
            "checks": {
                "trained_models": state.registry.len(),
                "sales_series": state.sales.keys().len(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Creates the health router
pub fn health_routes(registry: Arc<ModelRegistry>, sales: Arc<SalesStore>) -> Router {
    let state = Arc::new(HealthState::new(registry, sales));

    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
        .route("/ready", get(readiness_check))
        .route("/version", get(version_info))
        .with_state(state)
}
