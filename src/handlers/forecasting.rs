use axum::extract::{Json, State};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::services::forecasting::{ForecastOutcome, ModelStatus, PerformanceSummary, TrainReport};
use crate::services::sales_data::SalesRecord;
use crate::{ApiResponse, ApiResult, AppState};

fn default_horizon() -> u32 {
    7
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ForecastRequest {
    #[validate(length(min = 1, max = 50))]
    pub warehouse_id: String,
    #[validate(length(min = 1, max = 100))]
    pub sku_id: String,
    /// Forecast horizon in days (1-30)
    #[serde(default = "default_horizon")]
    pub horizon_days: u32,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TrainForecastRequest {
    #[validate(length(min = 1, max = 50))]
    pub warehouse_id: String,
    #[validate(length(min = 1, max = 100))]
    pub sku_id: String,
    pub sales_data: Vec<SalesRecord>,
}

#[derive(Debug, serde::Serialize, ToSchema)]
pub struct ModelsOverview {
    pub models: Vec<ModelStatus>,
    pub summary: PerformanceSummary,
}

/// Generate a demand forecast from the trained model for a (warehouse, SKU)
#[utoipa::path(
    post,
    path = "/api/v1/forecast",
    request_body = ForecastRequest,
    responses(
        (status = 200, description = "Forecast generated"),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Model not trained", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient history", body = crate::errors::ErrorResponse)
    ),
    tag = "forecasting"
)]
pub async fn generate_forecast(
    State(state): State<AppState>,
    Json(payload): Json<ForecastRequest>,
) -> ApiResult<ForecastOutcome> {
    payload.validate()?;
    let outcome = state
        .services
        .forecasting
        .forecast(&payload.warehouse_id, &payload.sku_id, payload.horizon_days)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Train (or retrain) the demand model for a (warehouse, SKU)
#[utoipa::path(
    post,
    path = "/api/v1/forecast/train",
    request_body = TrainForecastRequest,
    responses(
        (status = 200, description = "Model trained"),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient training data", body = crate::errors::ErrorResponse)
    ),
    tag = "forecasting"
)]
pub async fn train_forecast_model(
    State(state): State<AppState>,
    Json(payload): Json<TrainForecastRequest>,
) -> ApiResult<TrainReport> {
    payload.validate()?;
    let report = state
        .services
        .forecasting
        .train(&payload.warehouse_id, &payload.sku_id, payload.sales_data)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

/// List registered models with their metrics and the aggregate roll-up
#[utoipa::path(
    get,
    path = "/api/v1/forecast/models",
    responses(
        (status = 200, description = "Model list returned")
    ),
    tag = "forecasting"
)]
pub async fn list_models(State(state): State<AppState>) -> ApiResult<ModelsOverview> {
    let (models, summary) = state.services.forecasting.registry_overview();
    Ok(Json(ApiResponse::success(ModelsOverview { models, summary })))
}
