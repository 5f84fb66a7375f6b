use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::request_id::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard error payload returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "message": "Insufficient history: 12 days supplied, 30 required",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-11-04T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details (e.g., per-row ingestion failures)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Which hard constraint made a routing request unsolvable.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "constraint", rename_all = "snake_case")]
pub enum RoutingDiagnostic {
    /// A single stop demands more than one vehicle can carry.
    CapacityExceeded {
        stop_id: String,
        demand_qty: u32,
        vehicle_capacity: u32,
    },
    /// A stop's time window closes before any vehicle can reach it.
    TimeWindowUnreachable { stop_id: String, tw_end: u32 },
    /// A stop cannot be served within the maximum route duration.
    RouteDurationExceeded { stop_id: String, max_minutes: u32 },
}

impl std::fmt::Display for RoutingDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExceeded {
                stop_id,
                demand_qty,
                vehicle_capacity,
            } => write!(
                f,
                "stop {} demands {} units but vehicle capacity is {}",
                stop_id, demand_qty, vehicle_capacity
            ),
            Self::TimeWindowUnreachable { stop_id, tw_end } => write!(
                f,
                "stop {} cannot be reached before its window closes at minute {}",
                stop_id, tw_end
            ),
            Self::RouteDurationExceeded {
                stop_id,
                max_minutes,
            } => write!(
                f,
                "stop {} cannot be served within the {}-minute route limit",
                stop_id, max_minutes
            ),
        }
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum EngineError {
    #[error("Insufficient history: {actual} days supplied, {required} required")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("Insufficient training data: {actual} days supplied, {required} required")]
    InsufficientTrainingData { required: usize, actual: usize },

    #[error("Invalid lead time: {0} (must be positive)")]
    InvalidLeadTime(i32),

    #[error("Invalid service level: {0} (must be in [0.50, 1.0))")]
    InvalidServiceLevel(f64),

    #[error("Invalid forecast horizon: {0} (must be in [1, 30])")]
    InvalidHorizon(u32),

    #[error("No trained model for warehouse {warehouse_id}, SKU {sku_id}")]
    ModelNotTrained {
        warehouse_id: String,
        sku_id: String,
    },

    #[error("Routing infeasible: {0}")]
    InfeasibleRouting(RoutingDiagnostic),

    #[error("Upload rejected: {rejected} of {total} rows malformed")]
    IngestionRejected {
        rejected: usize,
        total: usize,
        row_errors: Vec<crate::services::ingestion::RowError>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::ValidationError(err.to_string())
    }
}

impl EngineError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InsufficientHistory { .. }
            | Self::InsufficientTrainingData { .. }
            | Self::InfeasibleRouting(_)
            | Self::IngestionRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidLeadTime(_)
            | Self::InvalidServiceLevel(_)
            | Self::InvalidHorizon(_)
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::ModelNotTrained { .. } | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalError(_) | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.response_message();

        let details = match &self {
            Self::IngestionRejected { row_errors, .. } if !row_errors.is_empty() => {
                serde_json::to_value(row_errors).ok()
            }
            _ => None,
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
