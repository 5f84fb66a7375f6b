use axum::extract::{Json, State};

use crate::services::ingestion::IngestReport;
use crate::{ApiResponse, ApiResult, AppState};

/// Upload sales history as CSV
///
/// Body format: `date,warehouse_id,sku_id,units_sold,revenue,order_id,client_id`
/// with dates as `YYYY-MM-DD`. Malformed rows are reported individually; the
/// upload fails only when too large a fraction of rows is malformed.
#[utoipa::path(
    post,
    path = "/api/v1/ingestion/sales",
    request_body(content = String, content_type = "text/csv"),
    responses(
        (status = 200, description = "Upload merged; response lists any rejected rows"),
        (status = 400, description = "Unusable upload", body = crate::errors::ErrorResponse),
        (status = 422, description = "Quality threshold exceeded", body = crate::errors::ErrorResponse)
    ),
    tag = "ingestion"
)]
pub async fn ingest_sales_csv(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<IngestReport> {
    let report = state.services.ingestion.ingest_csv(&body)?;
    Ok(Json(ApiResponse::success(report)))
}
