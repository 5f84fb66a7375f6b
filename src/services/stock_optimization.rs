//! Safety-stock, reorder-point, and order-quantity recommendations.
//!
//! The core computation is pure: it consumes a forecast and replenishment
//! parameters and produces a recommendation. Daily demand sigma is recovered
//! from the forecast's own confidence band (`(upper - lower) / 2·z_f`), so
//! the stock policy and the forecaster agree on one uncertainty model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use crate::errors::EngineError;
use crate::ml::features::{self, DailySales};
use crate::ml::forecasting::{ForecastPoint, INTERVAL_Z, MAX_HORIZON_DAYS};
use crate::ml::registry::ModelKey;
use crate::services::forecasting::ForecastService;
use crate::services::sales_data::SalesStore;

/// Service-level → z-score table; linear interpolation between entries.
pub const SERVICE_LEVEL_Z_TABLE: &[(f64, f64)] = &[
    (0.500, 0.000),
    (0.800, 0.842),
    (0.850, 1.036),
    (0.900, 1.282),
    (0.950, 1.645),
    (0.975, 1.960),
    (0.990, 2.326),
    (0.995, 2.576),
    (0.999, 3.090),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Urgent,
    Low,
    Optimal,
    Excess,
}

/// Descriptive statistics of the observed demand series, returned alongside
/// the recommendation for the dashboard to render.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DemandStatistics {
    pub mean_daily_demand: f64,
    pub std_daily_demand: f64,
    pub median_daily_demand: f64,
    pub p95_daily_demand: f64,
    pub p99_daily_demand: f64,
    pub coefficient_of_variation: f64,
    pub total_days: usize,
    pub total_demand: u64,
    pub trend_direction: TrendDirection,
    pub trend_strength: TrendStrength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockRecommendation {
    pub warehouse_id: String,
    pub sku_id: String,
    pub current_stock: i64,
    pub safety_stock: i64,
    pub reorder_point: i64,
    pub recommended_order_qty: i64,
    pub lead_time_days: u32,
    pub status: StockStatus,
    pub demand_during_lead_time: f64,
    /// Banded heuristic probability of stocking out before replenishment.
    pub stockout_risk: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demand_statistics: Option<DemandStatistics>,
}

/// Maps a target service level to its z multiplier.
/// Valid levels are `[0.50, 1.0)`; interpolates between table entries.
pub fn service_level_z(level: f64) -> Result<f64, EngineError> {
    if !level.is_finite() || !(0.50..1.0).contains(&level) {
        return Err(EngineError::InvalidServiceLevel(level));
    }
    let table = SERVICE_LEVEL_Z_TABLE;
    for pair in table.windows(2) {
        let (lo_level, lo_z) = pair[0];
        let (hi_level, hi_z) = pair[1];
        if level <= hi_level {
            let t = (level - lo_level) / (hi_level - lo_level);
            return Ok(lo_z + t * (hi_z - lo_z));
        }
    }
    // Above the last tabulated level (≥ 0.999): use the final entry.
    Ok(table[table.len() - 1].1)
}

/// Core stock computation. Pure; the forecast supplies both expected demand
/// and its dispersion. Lead times beyond the forecast horizon extrapolate
/// the final forecast day flat.
pub fn recommend(
    warehouse_id: &str,
    sku_id: &str,
    current_stock: i64,
    forecast: &[ForecastPoint],
    lead_time_days: i32,
    target_service_level: f64,
) -> Result<StockRecommendation, EngineError> {
    if lead_time_days <= 0 {
        return Err(EngineError::InvalidLeadTime(lead_time_days));
    }
    let z = service_level_z(target_service_level)?;
    if forecast.is_empty() {
        return Err(EngineError::ValidationError(
            "forecast must contain at least one day".to_string(),
        ));
    }

    // Negative stock (oversold ledger) is valid input, treated as empty.
    let stock = current_stock.max(0);

    let last = forecast.last().expect("non-empty forecast");
    let mut demand_during_lead_time = 0.0;
    let mut lead_time_variance = 0.0;
    for day in 0..lead_time_days as usize {
        let point = forecast.get(day).unwrap_or(last);
        demand_during_lead_time += point.predicted_demand;
        let sigma = (point.confidence_upper - point.confidence_lower) / (2.0 * INTERVAL_Z);
        lead_time_variance += sigma * sigma;
    }

    let safety_stock = (z * lead_time_variance.sqrt()).ceil() as i64;
    let lead_time_demand = demand_during_lead_time.ceil() as i64;
    let reorder_point = lead_time_demand + safety_stock;

    // Order back up to the target level one safety band above the reorder
    // point; never negative.
    let recommended_order_qty = (reorder_point + safety_stock - stock).max(0);

    let status = if stock < lead_time_demand {
        StockStatus::Urgent
    } else if stock < reorder_point {
        StockStatus::Low
    } else if stock <= reorder_point + safety_stock {
        StockStatus::Optimal
    } else {
        StockStatus::Excess
    };

    let stockout_risk = if stock == 0 {
        1.0
    } else if stock >= reorder_point {
        0.05
    } else if stock * 2 >= reorder_point {
        0.25
    } else {
        0.75
    };

    Ok(StockRecommendation {
        warehouse_id: warehouse_id.to_string(),
        sku_id: sku_id.to_string(),
        current_stock: stock,
        safety_stock,
        reorder_point,
        recommended_order_qty,
        lead_time_days: lead_time_days as u32,
        status,
        demand_during_lead_time,
        stockout_risk,
        demand_statistics: None,
    })
}

/// Descriptive statistics of an observed series.
pub fn demand_statistics(series: &[DailySales]) -> Option<DemandStatistics> {
    if series.is_empty() {
        return None;
    }
    let mut values: Vec<f64> = series.iter().map(|d| d.units_sold as f64).collect();
    let (mean, std) = features::mean_std(&values);
    let slope = features::linear_slope(&values);
    let r = correlation_with_index(&values);

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(&values, 0.50);
    let p95 = percentile(&values, 0.95);
    let p99 = percentile(&values, 0.99);

    let trend_direction = if slope.abs() < 0.1 {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };
    let trend_strength = if r.abs() > 0.7 {
        TrendStrength::Strong
    } else if r.abs() > 0.4 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Weak
    };

    Some(DemandStatistics {
        mean_daily_demand: mean,
        std_daily_demand: std,
        median_daily_demand: median,
        p95_daily_demand: p95,
        p99_daily_demand: p99,
        coefficient_of_variation: if mean > 0.0 { std / mean } else { 0.0 },
        total_days: series.len(),
        total_demand: series.iter().map(|d| d.units_sold as u64).sum(),
        trend_direction,
        trend_strength,
    })
}

/// Linear interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Pearson correlation of values against their indices.
fn correlation_with_index(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        0.0
    } else {
        cov / (var_x.sqrt() * var_y.sqrt())
    }
}

/// Orchestrates forecast retrieval and the stock computation for one key.
pub struct StockOptimizationService {
    forecasting: Arc<ForecastService>,
    store: Arc<SalesStore>,
}

impl StockOptimizationService {
    pub fn new(forecasting: Arc<ForecastService>, store: Arc<SalesStore>) -> Self {
        Self { forecasting, store }
    }

    #[instrument(skip(self))]
    pub async fn recommend(
        &self,
        warehouse_id: &str,
        sku_id: &str,
        current_stock: i64,
        lead_time_days: i32,
        target_service_level: f64,
    ) -> Result<StockRecommendation, EngineError> {
        // Validate caller inputs before touching the model registry, so an
        // invalid lead time is reported even for untrained keys.
        if lead_time_days <= 0 {
            return Err(EngineError::InvalidLeadTime(lead_time_days));
        }
        service_level_z(target_service_level)?;

        let horizon = (lead_time_days as u32).min(MAX_HORIZON_DAYS);
        let outcome = self
            .forecasting
            .forecast(warehouse_id, sku_id, horizon)
            .await?;

        let mut recommendation = recommend(
            warehouse_id,
            sku_id,
            current_stock,
            &outcome.forecast,
            lead_time_days,
            target_service_level,
        )?;

        let key = ModelKey::new(warehouse_id, sku_id);
        recommendation.demand_statistics = self
            .store
            .series(&key)
            .as_deref()
            .and_then(demand_statistics);

        Ok(recommendation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, NaiveDate};
    use test_case::test_case;

    fn flat_forecast(days: u32, demand: f64, half_width: f64) -> Vec<ForecastPoint> {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        (0..days)
            .map(|h| ForecastPoint {
                date: start + Duration::days(h as i64),
                predicted_demand: demand,
                confidence_lower: (demand - half_width).max(0.0),
                confidence_upper: demand + half_width,
                model_confidence: 0.85,
            })
            .collect()
    }

    #[test]
    fn invalid_lead_time_is_rejected() {
        let forecast = flat_forecast(7, 10.0, 2.0);
        assert_matches!(
            recommend("WH001", "SKU-001", 50, &forecast, 0, 0.95),
            Err(EngineError::InvalidLeadTime(0))
        );
        assert_matches!(
            recommend("WH001", "SKU-001", 50, &forecast, -2, 0.95),
            Err(EngineError::InvalidLeadTime(-2))
        );
    }

    #[test]
    fn invalid_service_level_is_rejected() {
        let forecast = flat_forecast(7, 10.0, 2.0);
        assert_matches!(
            recommend("WH001", "SKU-001", 50, &forecast, 7, 1.0),
            Err(EngineError::InvalidServiceLevel(_))
        );
        assert_matches!(
            recommend("WH001", "SKU-001", 50, &forecast, 7, 0.3),
            Err(EngineError::InvalidServiceLevel(_))
        );
    }

    #[test_case(0.50, 0.000)]
    #[test_case(0.90, 1.282)]
    #[test_case(0.95, 1.645)]
    #[test_case(0.975, 1.960)]
    #[test_case(0.99, 2.326)]
    fn z_table_matches_reference(level: f64, expected: f64) {
        assert!((service_level_z(level).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn z_table_interpolates() {
        let z925 = service_level_z(0.925).unwrap();
        assert!(z925 > 1.282 && z925 < 1.645, "z(0.925) = {}", z925);
        // monotone in the level
        assert!(service_level_z(0.99).unwrap() > service_level_z(0.95).unwrap());
    }

    #[test]
    fn zero_stock_with_steady_demand_is_urgent() {
        // no stock, a 7-day lead, flat 10/day demand, 95% service level
        let forecast = flat_forecast(7, 10.0, 3.0);
        let rec = recommend("WH001", "SKU-001", 0, &forecast, 7, 0.95).unwrap();

        assert_eq!(rec.status, StockStatus::Urgent);
        assert!(rec.recommended_order_qty as f64 > rec.demand_during_lead_time);
        assert!((rec.demand_during_lead_time - 70.0).abs() < 1e-9);
        assert!(rec.safety_stock > 0);
        assert_eq!(rec.stockout_risk, 1.0);
    }

    #[test]
    fn invariants_hold_for_zero_variance_forecast() {
        let forecast = flat_forecast(7, 10.0, 0.0);
        let rec = recommend("WH001", "SKU-001", 70, &forecast, 7, 0.95).unwrap();

        assert_eq!(rec.safety_stock, 0);
        assert!(rec.safety_stock <= rec.reorder_point);
        assert!(rec.recommended_order_qty >= 0);
        // exactly at the reorder point with a zero band: optimal
        assert_eq!(rec.status, StockStatus::Optimal);
    }

    #[test]
    fn negative_stock_is_clamped() {
        let forecast = flat_forecast(7, 10.0, 2.0);
        let rec = recommend("WH001", "SKU-001", -25, &forecast, 7, 0.95).unwrap();
        assert_eq!(rec.current_stock, 0);
        assert!(rec.recommended_order_qty >= rec.reorder_point);
        assert_eq!(rec.status, StockStatus::Urgent);
    }

    #[test]
    fn ample_stock_is_excess() {
        let forecast = flat_forecast(7, 10.0, 2.0);
        let rec = recommend("WH001", "SKU-001", 100_000, &forecast, 7, 0.95).unwrap();
        assert_eq!(rec.status, StockStatus::Excess);
        assert_eq!(rec.recommended_order_qty, 0);
        assert_eq!(rec.stockout_risk, 0.05);
    }

    #[test]
    fn lead_time_beyond_horizon_extrapolates_flat() {
        let forecast = flat_forecast(7, 10.0, 2.0);
        let rec = recommend("WH001", "SKU-001", 0, &forecast, 14, 0.95).unwrap();
        assert!((rec.demand_during_lead_time - 140.0).abs() < 1e-9);
    }

    #[test]
    fn status_bands_partition_the_stock_axis() {
        let forecast = flat_forecast(7, 10.0, 4.0);
        let probe = recommend("WH001", "SKU-001", 0, &forecast, 7, 0.95).unwrap();
        let (rop, ss) = (probe.reorder_point, probe.safety_stock);

        let urgent = recommend("WH001", "SKU-001", 69, &forecast, 7, 0.95).unwrap();
        assert_eq!(urgent.status, StockStatus::Urgent);

        let low = recommend("WH001", "SKU-001", rop - 1, &forecast, 7, 0.95).unwrap();
        assert_eq!(low.status, StockStatus::Low);

        let optimal = recommend("WH001", "SKU-001", rop + ss, &forecast, 7, 0.95).unwrap();
        assert_eq!(optimal.status, StockStatus::Optimal);

        let excess = recommend("WH001", "SKU-001", rop + ss + 1, &forecast, 7, 0.95).unwrap();
        assert_eq!(excess.status, StockStatus::Excess);
    }

    #[test]
    fn higher_service_level_means_more_safety_stock() {
        let forecast = flat_forecast(7, 10.0, 3.0);
        let at_90 = recommend("WH001", "SKU-001", 0, &forecast, 7, 0.90).unwrap();
        let at_99 = recommend("WH001", "SKU-001", 0, &forecast, 7, 0.99).unwrap();
        assert!(at_99.safety_stock > at_90.safety_stock);
    }

    #[test]
    fn demand_statistics_summarize_the_series() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let series: Vec<DailySales> = (0..30)
            .map(|i| DailySales {
                date: start + Duration::days(i),
                units_sold: 10 + i as u32, // strong upward ramp
            })
            .collect();

        let stats = demand_statistics(&series).unwrap();
        assert_eq!(stats.total_days, 30);
        assert_eq!(stats.trend_direction, TrendDirection::Increasing);
        assert_eq!(stats.trend_strength, TrendStrength::Strong);
        assert!(stats.p95_daily_demand >= stats.median_daily_demand);
        assert!(stats.p99_daily_demand >= stats.p95_daily_demand);
    }
}
