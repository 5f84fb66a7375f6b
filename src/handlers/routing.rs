use axum::extract::{Json, State};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::EngineError;
use crate::services::routing::{
    DeliveryStop, Depot, RoutingSolution, SolverOptions, VehicleOptions,
};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OptimizeRoutesRequest {
    #[validate(length(min = 1, max = 50))]
    pub warehouse_id: String,
    #[validate]
    pub depot: Depot,
    #[validate]
    pub delivery_points: Vec<DeliveryStop>,
    #[serde(default)]
    pub vehicle: Option<VehicleOptions>,
    #[serde(default)]
    pub solver: Option<SolverOptions>,
}

/// Compute capacity-respecting delivery routes for a stop list
#[utoipa::path(
    post,
    path = "/api/v1/routes/optimize",
    request_body = OptimizeRoutesRequest,
    responses(
        (status = 200, description = "Routes computed; `partial` marks a time-boxed best-effort solution"),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "No feasible assignment", body = crate::errors::ErrorResponse)
    ),
    tag = "routing"
)]
pub async fn optimize_routes(
    State(state): State<AppState>,
    Json(payload): Json<OptimizeRoutesRequest>,
) -> ApiResult<RoutingSolution> {
    payload.validate()?;

    // The solve can occupy its full time budget; keep it off the async
    // workers.
    let routing = state.services.routing.clone();
    let solution = tokio::task::spawn_blocking(move || {
        routing.optimize(
            &payload.warehouse_id,
            &payload.depot,
            &payload.delivery_points,
            &payload.vehicle.unwrap_or_default(),
            &payload.solver.unwrap_or_default(),
        )
    })
    .await
    .map_err(|e| EngineError::InternalError(format!("routing solver task failed: {}", e)))??;

    Ok(Json(ApiResponse::success(solution)))
}
