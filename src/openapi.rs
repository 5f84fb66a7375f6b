//! OpenAPI documentation for the engine's HTTP surface.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StockRoute API",
        description = "Inventory and routing decision engine: demand forecasting, anomaly detection, stock optimization, and vehicle route planning",
        license(name = "Apache-2.0")
    ),
    paths(
        crate::handlers::forecasting::generate_forecast,
        crate::handlers::forecasting::train_forecast_model,
        crate::handlers::forecasting::list_models,
        crate::handlers::inventory::stock_recommendations,
        crate::handlers::anomalies::detect_anomalies,
        crate::handlers::routing::optimize_routes,
        crate::handlers::ingestion::ingest_sales_csv,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::errors::RoutingDiagnostic,
        crate::ml::forecasting::ForecastPoint,
        crate::ml::forecasting::ModelMetrics,
        crate::ml::forecasting::TrainingQuality,
        crate::services::sales_data::SalesRecord,
        crate::services::forecasting::TrainReport,
        crate::services::forecasting::ForecastOutcome,
        crate::services::forecasting::ModelStatus,
        crate::services::forecasting::PerformanceSummary,
        crate::services::forecasting::RankedModel,
        crate::services::stock_optimization::StockRecommendation,
        crate::services::stock_optimization::StockStatus,
        crate::services::stock_optimization::DemandStatistics,
        crate::services::stock_optimization::TrendDirection,
        crate::services::stock_optimization::TrendStrength,
        crate::services::anomaly_detection::Anomaly,
        crate::services::anomaly_detection::AnomalyType,
        crate::services::anomaly_detection::Severity,
        crate::services::anomaly_detection::SensitivityConfig,
        crate::services::routing::DeliveryStop,
        crate::services::routing::Depot,
        crate::services::routing::TimeWindow,
        crate::services::routing::VehicleOptions,
        crate::services::routing::SolverOptions,
        crate::services::routing::ObjectivePreset,
        crate::services::routing::Route,
        crate::services::routing::PlannedStop,
        crate::services::routing::RouteStatistics,
        crate::services::routing::EfficiencyDistribution,
        crate::services::routing::RoutingSolution,
        crate::services::ingestion::IngestReport,
        crate::services::ingestion::RowError,
        crate::services::ingestion::DateRange,
        crate::handlers::forecasting::ForecastRequest,
        crate::handlers::forecasting::TrainForecastRequest,
        crate::handlers::forecasting::ModelsOverview,
        crate::handlers::inventory::StockRecommendationRequest,
        crate::handlers::anomalies::DetectAnomaliesRequest,
        crate::handlers::anomalies::DetectAnomaliesResponse,
        crate::handlers::anomalies::SalesPoint,
        crate::handlers::routing::OptimizeRoutesRequest,
    ))
)]
pub struct ApiDoc;
