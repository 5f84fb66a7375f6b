use axum::extract::{Json, State};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::services::stock_optimization::StockRecommendation;
use crate::{ApiResponse, ApiResult, AppState};

fn default_service_level() -> f64 {
    0.95
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct StockRecommendationRequest {
    #[validate(length(min = 1, max = 50))]
    pub warehouse_id: String,
    #[validate(length(min = 1, max = 100))]
    pub sku_id: String,
    /// On-hand units; negative ledgers are treated as zero
    pub current_stock: i64,
    /// Days between placing and receiving a replenishment order
    pub lead_time_days: i32,
    /// Target probability of not stocking out during lead time
    #[serde(default = "default_service_level")]
    pub target_service_level: f64,
}

/// Compute safety stock, reorder point, and order quantity for a (warehouse, SKU)
#[utoipa::path(
    post,
    path = "/api/v1/inventory/recommendations",
    request_body = StockRecommendationRequest,
    responses(
        (status = 200, description = "Recommendation computed"),
        (status = 400, description = "Invalid lead time or service level", body = crate::errors::ErrorResponse),
        (status = 404, description = "Model not trained", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient history", body = crate::errors::ErrorResponse)
    ),
    tag = "inventory"
)]
pub async fn stock_recommendations(
    State(state): State<AppState>,
    Json(payload): Json<StockRecommendationRequest>,
) -> ApiResult<StockRecommendation> {
    payload.validate()?;
    let recommendation = state
        .services
        .stock
        .recommend(
            &payload.warehouse_id,
            &payload.sku_id,
            payload.current_stock,
            payload.lead_time_days,
            payload.target_service_level,
        )
        .await?;
    Ok(Json(ApiResponse::success(recommendation)))
}
