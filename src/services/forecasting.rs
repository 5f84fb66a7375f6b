//! Forecast orchestration: trains models into the registry, serves forecasts
//! from model snapshots, and reports model status.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::errors::EngineError;
use crate::ml::features;
use crate::ml::forecasting::{DemandModel, ForecastPoint, ModelMetrics, TrainingQuality};
use crate::ml::registry::{ModelKey, ModelRegistry};
use crate::services::sales_data::{SalesRecord, SalesStore};

/// Cached forecasts are keyed by (warehouse, sku, horizon, data version).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ForecastCacheKey {
    key: ModelKey,
    horizon_days: u32,
    data_version: u64,
}

/// Result of a training run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrainReport {
    pub model_key: String,
    pub data_points: usize,
    pub quality: TrainingQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ModelMetrics>,
    pub trained_at: chrono::DateTime<chrono::Utc>,
}

/// A forecast with the model context the dashboard renders alongside it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ForecastOutcome {
    pub warehouse_id: String,
    pub sku_id: String,
    pub horizon_days: u32,
    pub forecast: Vec<ForecastPoint>,
    pub quality: TrainingQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_metrics: Option<ModelMetrics>,
}

/// Status of one registered model.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelStatus {
    pub warehouse_id: String,
    pub sku_id: String,
    pub trained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_days: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<TrainingQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ModelMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Registry-wide performance roll-up.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PerformanceSummary {
    pub total_models: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_mape: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_performing: Option<RankedModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_performing: Option<RankedModel>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RankedModel {
    pub model_key: String,
    pub mape: f64,
}

pub struct ForecastService {
    registry: Arc<ModelRegistry>,
    store: Arc<SalesStore>,
    cache: DashMap<ForecastCacheKey, Arc<Vec<ForecastPoint>>>,
}

impl ForecastService {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<SalesStore>) -> Self {
        Self {
            registry,
            store,
            cache: DashMap::new(),
        }
    }

    /// Trains (or retrains) the model for one (warehouse, SKU) pair from the
    /// supplied records merged with previously ingested history.
    ///
    /// Holds the per-key training lock for the whole fit-and-publish, so a
    /// concurrent retrain of the same key waits while other keys proceed.
    #[instrument(skip(self, sales_data))]
    pub async fn train(
        &self,
        warehouse_id: &str,
        sku_id: &str,
        sales_data: Vec<SalesRecord>,
    ) -> Result<TrainReport, EngineError> {
        let key = ModelKey::new(warehouse_id, sku_id);

        if let Some(stray) = sales_data
            .iter()
            .find(|r| r.warehouse_id != warehouse_id || r.sku_id != sku_id)
        {
            return Err(EngineError::ValidationError(format!(
                "record for {}/{} does not belong to {}/{}",
                stray.warehouse_id, stray.sku_id, warehouse_id, sku_id
            )));
        }

        let lock = self.registry.training_lock(&key);
        let _guard = lock.lock().await;

        if !sales_data.is_empty() {
            self.store.merge(&sales_data);
        }
        let series = self
            .store
            .series(&key)
            .ok_or_else(|| EngineError::InsufficientTrainingData {
                required: crate::ml::forecasting::MIN_TRAINING_DAYS,
                actual: 0,
            })?;

        let model = DemandModel::fit(&series)?;
        let snapshot = self.registry.publish(key.clone(), model);

        // A new snapshot invalidates any cached forecasts for this key.
        self.cache.retain(|cached, _| cached.key != key);

        info!(
            model_key = %key,
            data_points = snapshot.trained_days,
            quality = ?snapshot.quality,
            "demand model trained"
        );

        Ok(TrainReport {
            model_key: key.to_string(),
            data_points: snapshot.trained_days,
            quality: snapshot.quality,
            metrics: snapshot.metrics.clone(),
            trained_at: snapshot.trained_at,
        })
    }

    /// Serves a forecast from the current model snapshot.
    ///
    /// Fails with `ModelNotTrained` when no model exists for the key and
    /// `InsufficientHistory` when the ingested series is shorter than the
    /// model's 30-day context window.
    #[instrument(skip(self))]
    pub async fn forecast(
        &self,
        warehouse_id: &str,
        sku_id: &str,
        horizon_days: u32,
    ) -> Result<ForecastOutcome, EngineError> {
        let key = ModelKey::new(warehouse_id, sku_id);

        let model = self
            .registry
            .get(&key)
            .ok_or_else(|| EngineError::ModelNotTrained {
                warehouse_id: warehouse_id.to_string(),
                sku_id: sku_id.to_string(),
            })?;

        let series = self.store.series(&key).unwrap_or_default();
        features::ensure_min_history(&series, features::MIN_HISTORY_DAYS)?;

        let data_version = self.store.version(&key).unwrap_or(0);
        let cache_key = ForecastCacheKey {
            key,
            horizon_days,
            data_version,
        };

        let points = if let Some(cached) = self.cache.get(&cache_key) {
            Arc::clone(cached.value())
        } else {
            let fresh = Arc::new(model.forecast(horizon_days)?);
            self.cache.insert(cache_key, Arc::clone(&fresh));
            fresh
        };

        Ok(ForecastOutcome {
            warehouse_id: warehouse_id.to_string(),
            sku_id: sku_id.to_string(),
            horizon_days,
            forecast: points.as_ref().clone(),
            quality: model.quality,
            model_metrics: model.metrics.clone(),
        })
    }

    /// Status for one key; "not trained" is a status, not an error.
    pub fn model_status(&self, warehouse_id: &str, sku_id: &str) -> ModelStatus {
        let key = ModelKey::new(warehouse_id, sku_id);
        match self.registry.get(&key) {
            Some(model) => ModelStatus {
                warehouse_id: warehouse_id.to_string(),
                sku_id: sku_id.to_string(),
                trained: true,
                trained_days: Some(model.trained_days),
                quality: Some(model.quality),
                metrics: model.metrics.clone(),
                trained_at: Some(model.trained_at),
            },
            None => ModelStatus {
                warehouse_id: warehouse_id.to_string(),
                sku_id: sku_id.to_string(),
                trained: false,
                trained_days: None,
                quality: None,
                metrics: None,
                trained_at: None,
            },
        }
    }

    /// Status of every registered model plus the aggregate roll-up.
    pub fn registry_overview(&self) -> (Vec<ModelStatus>, PerformanceSummary) {
        let snapshot = self.registry.snapshot();

        let statuses: Vec<ModelStatus> = snapshot
            .iter()
            .map(|(key, model)| ModelStatus {
                warehouse_id: key.warehouse_id.clone(),
                sku_id: key.sku_id.clone(),
                trained: true,
                trained_days: Some(model.trained_days),
                quality: Some(model.quality),
                metrics: model.metrics.clone(),
                trained_at: Some(model.trained_at),
            })
            .collect();

        let mut ranked: Vec<(String, f64, f64)> = snapshot
            .iter()
            .filter_map(|(key, model)| {
                let metrics = model.metrics.as_ref()?;
                Some((key.to_string(), metrics.mape?, metrics.rmse))
            })
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let summary = PerformanceSummary {
            total_models: snapshot.len(),
            average_mape: mean(ranked.iter().map(|r| r.1)),
            average_rmse: mean(ranked.iter().map(|r| r.2)),
            best_performing: ranked.first().map(|(model_key, mape, _)| RankedModel {
                model_key: model_key.clone(),
                mape: *mape,
            }),
            worst_performing: ranked.last().map(|(model_key, mape, _)| RankedModel {
                model_key: model_key.clone(),
                mape: *mape,
            }),
        };

        (statuses, summary)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        None
    } else {
        Some(collected.iter().sum::<f64>() / collected.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, NaiveDate};

    fn service() -> ForecastService {
        ForecastService::new(Arc::new(ModelRegistry::new()), Arc::new(SalesStore::new()))
    }

    fn records(warehouse_id: &str, sku_id: &str, days: usize) -> Vec<SalesRecord> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        (0..days)
            .map(|i| SalesRecord {
                date: start + Duration::days(i as i64),
                warehouse_id: warehouse_id.to_string(),
                sku_id: sku_id.to_string(),
                units_sold: 20 + (i % 7) as u32,
                revenue: None,
                order_id: None,
                client_id: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn forecast_before_training_is_model_not_trained() {
        let svc = service();
        let err = svc.forecast("WH001", "SKU-001", 7).await.unwrap_err();
        assert_matches!(err, EngineError::ModelNotTrained { .. });
    }

    #[tokio::test]
    async fn train_then_forecast_round_trips() {
        let svc = service();
        let report = svc
            .train("WH001", "SKU-001", records("WH001", "SKU-001", 120))
            .await
            .unwrap();
        assert_eq!(report.quality, TrainingQuality::Production);
        assert_eq!(report.data_points, 120);

        let outcome = svc.forecast("WH001", "SKU-001", 14).await.unwrap();
        assert_eq!(outcome.forecast.len(), 14);
        assert_eq!(outcome.quality, TrainingQuality::Production);
    }

    #[tokio::test]
    async fn training_rejects_records_for_another_key() {
        let svc = service();
        let mut data = records("WH001", "SKU-001", 40);
        data[3].sku_id = "SKU-OTHER".to_string();

        let err = svc.train("WH001", "SKU-001", data).await.unwrap_err();
        assert_matches!(err, EngineError::ValidationError(_));
    }

    #[tokio::test]
    async fn training_below_floor_is_refused() {
        let svc = service();
        let err = svc
            .train("WH001", "SKU-001", records("WH001", "SKU-001", 12))
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::InsufficientTrainingData { actual: 12, .. });
    }

    #[tokio::test]
    async fn cached_forecast_is_reused_until_data_changes() {
        let svc = service();
        svc.train("WH001", "SKU-001", records("WH001", "SKU-001", 60))
            .await
            .unwrap();

        let first = svc.forecast("WH001", "SKU-001", 7).await.unwrap();
        let second = svc.forecast("WH001", "SKU-001", 7).await.unwrap();
        assert_eq!(first.forecast, second.forecast);
        assert_eq!(svc.cache.len(), 1);

        // New data bumps the version; retraining invalidates the cache.
        svc.train("WH001", "SKU-001", records("WH001", "SKU-001", 90))
            .await
            .unwrap();
        assert!(svc.cache.is_empty());
    }

    #[tokio::test]
    async fn registry_overview_ranks_models_by_mape() {
        let svc = service();
        svc.train("WH001", "SKU-001", records("WH001", "SKU-001", 120))
            .await
            .unwrap();
        svc.train("WH001", "SKU-002", records("WH001", "SKU-002", 120))
            .await
            .unwrap();

        let (statuses, summary) = svc.registry_overview();
        assert_eq!(statuses.len(), 2);
        assert_eq!(summary.total_models, 2);
        assert!(summary.average_mape.is_some());
        assert!(summary.best_performing.is_some());
    }

    #[tokio::test]
    async fn status_reports_untrained_keys_without_error() {
        let svc = service();
        let status = svc.model_status("WH001", "SKU-404");
        assert!(!status.trained);
        assert!(status.metrics.is_none());
    }
}
