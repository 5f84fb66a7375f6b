/*!
 * # Forecasting Module
 *
 * Per-SKU demand models and the machinery around them: calendar/rolling
 * feature extraction, the seasonal-trend forecaster, and the registry that
 * owns trained model snapshots.
 */

/// Calendar and rolling-window feature extraction
pub mod features;

/// Demand forecasting model (training and inference)
pub mod forecasting;

/// Trained-model registry keyed by (warehouse_id, sku_id)
pub mod registry;
