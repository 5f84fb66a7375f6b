// Decision-engine services

pub mod anomaly_detection;
pub mod forecasting;
pub mod ingestion;
pub mod routing;
pub mod sales_data;
pub mod stock_optimization;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::ml::registry::ModelRegistry;

/// Services layer that encapsulates the decision logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub registry: Arc<ModelRegistry>,
    pub sales: Arc<sales_data::SalesStore>,
    pub forecasting: Arc<forecasting::ForecastService>,
    pub stock: Arc<stock_optimization::StockOptimizationService>,
    pub anomaly: Arc<anomaly_detection::AnomalyDetectionService>,
    pub routing: Arc<routing::RouteOptimizationService>,
    pub ingestion: Arc<ingestion::IngestionService>,
}

impl AppServices {
    pub fn new(engine: &EngineConfig) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let sales = Arc::new(sales_data::SalesStore::new());

        let forecasting = Arc::new(forecasting::ForecastService::new(
            Arc::clone(&registry),
            Arc::clone(&sales),
        ));
        let stock = Arc::new(stock_optimization::StockOptimizationService::new(
            Arc::clone(&forecasting),
            Arc::clone(&sales),
        ));
        let anomaly = Arc::new(anomaly_detection::AnomalyDetectionService::new(
            engine.anomaly.clone(),
        ));
        let routing = Arc::new(routing::RouteOptimizationService::new(
            engine.routing.clone(),
        ));
        let ingestion = Arc::new(ingestion::IngestionService::new(
            Arc::clone(&sales),
            engine.ingestion.clone(),
        ));

        Self {
            registry,
            sales,
            forecasting,
            stock,
            anomaly,
            routing,
            ingestion,
        }
    }
}
