use axum::extract::{Json, State};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::ml::features::DailySales;
use crate::services::anomaly_detection::{Anomaly, SensitivityConfig};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SalesPoint {
    pub date: NaiveDate,
    pub units_sold: u32,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct DetectAnomaliesRequest {
    #[validate(length(min = 1, max = 50))]
    pub warehouse_id: String,
    #[validate(length(min = 1, max = 100))]
    pub sku_id: String,
    pub recent_data: Vec<SalesPoint>,
    /// Optional override of the configured sensitivity
    #[serde(default)]
    pub sensitivity: Option<SensitivityConfig>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DetectAnomaliesResponse {
    pub anomalies_detected: usize,
    pub anomalies: Vec<Anomaly>,
    pub window_days: usize,
    /// Fraction of examined days flagged anomalous
    pub anomaly_rate: f64,
    /// False when the window was too short for reliable statistics;
    /// distinct from "no anomalies found"
    pub window_sufficient: bool,
}

/// Flag sales-series deviations from the statistically expected range
#[utoipa::path(
    post,
    path = "/api/v1/anomalies/detect",
    request_body = DetectAnomaliesRequest,
    responses(
        (status = 200, description = "Detection completed"),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "anomalies"
)]
pub async fn detect_anomalies(
    State(state): State<AppState>,
    Json(payload): Json<DetectAnomaliesRequest>,
) -> ApiResult<DetectAnomaliesResponse> {
    payload.validate()?;

    let window: Vec<DailySales> = payload
        .recent_data
        .iter()
        .map(|point| DailySales {
            date: point.date,
            units_sold: point.units_sold,
        })
        .collect();

    let outcome = state.services.anomaly.detect(
        &payload.warehouse_id,
        &payload.sku_id,
        &window,
        payload.sensitivity,
    );

    let anomaly_rate = if outcome.window_days > 0 {
        outcome.anomalies.len() as f64 / outcome.window_days as f64
    } else {
        0.0
    };

    Ok(Json(ApiResponse::success(DetectAnomaliesResponse {
        anomalies_detected: outcome.anomalies.len(),
        anomalies: outcome.anomalies,
        window_days: outcome.window_days,
        anomaly_rate,
        window_sufficient: outcome.window_sufficient,
    })))
}
