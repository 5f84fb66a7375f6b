//! Per-SKU demand forecasting.
//!
//! The model is a deterministic seasonal-trend fit: ordinary least squares
//! over the trailing window for level and slope, a multiplicative weekday
//! profile, and a residual standard deviation that drives the confidence
//! interval. Any sufficiently accurate time-series model could sit behind
//! this interface; the binding contract is the shape of the output, not the
//! estimator.
//!
//! Contract highlights:
//! - training refuses series shorter than [`MIN_TRAINING_DAYS`];
//! - between [`MIN_TRAINING_DAYS`] and [`PRODUCTION_TRAINING_DAYS`] the model
//!   trains but carries a `below_production_minimum` quality flag;
//! - confidence interval width never decreases with forecast offset;
//! - `model_confidence` never increases with forecast offset;
//! - inference is fully deterministic for a given model snapshot.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::EngineError;
use crate::ml::features::{self, DailySales};

/// Trailing window used as the unit of context for level/trend fitting.
pub const SEQUENCE_LENGTH: usize = 30;

/// Hard floor: training refuses shorter series.
pub const MIN_TRAINING_DAYS: usize = features::MIN_HISTORY_DAYS;

/// Documented minimum for production-quality forecasts. Smaller sets still
/// train, flagged as below the production minimum.
pub const PRODUCTION_TRAINING_DAYS: usize = 100;

/// Maximum forecast horizon in days.
pub const MAX_HORIZON_DAYS: u32 = 30;

/// z multiplier for the forecast confidence band. Shared with the stock
/// engine, which inverts it to recover the daily demand sigma.
pub const INTERVAL_Z: f64 = 1.645;

const CONFIDENCE_BASE_PRODUCTION: f64 = 0.85;
const CONFIDENCE_BASE_LIMITED: f64 = 0.60;
const CONFIDENCE_BASE_DEGENERATE: f64 = 0.05;
const CONFIDENCE_DECAY: f64 = 0.05;
const CONFIDENCE_FLOOR: f64 = 0.5;

/// One forecasted day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_demand: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    /// Decays with forecast distance; pinned near 0 for degenerate models so
    /// callers can tell "low-confidence forecast" from "no data".
    pub model_confidence: f64,
}

/// Whether the model was trained on enough data for production use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrainingQuality {
    Production,
    BelowProductionMinimum,
}

/// Holdout evaluation metrics from an 80/20 chronological split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelMetrics {
    /// Mean absolute percentage error; absent when the holdout has no
    /// positive-demand days to take a percentage of.
    pub mape: Option<f64>,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

#[derive(Debug, Clone)]
struct FitParams {
    intercept: f64,
    slope: f64,
    window_len: usize,
    weekday_factors: [f64; 7],
    residual_std: f64,
    mean_demand: f64,
}

/// A trained demand model snapshot for one (warehouse, SKU) series.
///
/// Immutable once built; the registry replaces whole snapshots on retrain.
#[derive(Debug, Clone)]
pub struct DemandModel {
    params: FitParams,
    last_date: NaiveDate,
    pub trained_days: usize,
    pub quality: TrainingQuality,
    pub metrics: Option<ModelMetrics>,
    pub trained_at: DateTime<Utc>,
}

impl DemandModel {
    /// Trains a model on raw records (zero-filled to daily granularity).
    ///
    /// Fails with `InsufficientTrainingData` below the 30-day floor.
    pub fn fit(records: &[DailySales]) -> Result<Self, EngineError> {
        let series = features::zero_fill(records);
        if series.len() < MIN_TRAINING_DAYS {
            return Err(EngineError::InsufficientTrainingData {
                required: MIN_TRAINING_DAYS,
                actual: series.len(),
            });
        }

        let metrics = holdout_metrics(&series);
        let params = fit_parameters(&series);
        let quality = if series.len() >= PRODUCTION_TRAINING_DAYS {
            TrainingQuality::Production
        } else {
            TrainingQuality::BelowProductionMinimum
        };

        Ok(Self {
            params,
            last_date: series.last().expect("non-empty series").date,
            trained_days: series.len(),
            quality,
            metrics,
            trained_at: Utc::now(),
        })
    }

    /// Date of the last observation the model was trained on. Forecasts
    /// start the following day, so inference does not depend on wall clock.
    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    /// True when the model was trained on an all-zero series.
    pub fn is_degenerate(&self) -> bool {
        self.params.mean_demand == 0.0
    }

    /// Produces the point forecast with confidence bounds for
    /// `horizon_days` in `[1, MAX_HORIZON_DAYS]`.
    pub fn forecast(&self, horizon_days: u32) -> Result<Vec<ForecastPoint>, EngineError> {
        if horizon_days == 0 || horizon_days > MAX_HORIZON_DAYS {
            return Err(EngineError::InvalidHorizon(horizon_days));
        }

        let (base_confidence, floor) = if self.is_degenerate() {
            (CONFIDENCE_BASE_DEGENERATE, 0.0)
        } else {
            match self.quality {
                TrainingQuality::Production => (CONFIDENCE_BASE_PRODUCTION, CONFIDENCE_FLOOR),
                TrainingQuality::BelowProductionMinimum => {
                    (CONFIDENCE_BASE_LIMITED, CONFIDENCE_FLOOR.min(CONFIDENCE_BASE_LIMITED))
                }
            }
        };

        let mut points = Vec::with_capacity(horizon_days as usize);
        let mut min_width = 0.0_f64;

        for h in 1..=horizon_days {
            let offset = h as f64;
            let date = self.last_date + Duration::days(h as i64);
            let predicted = self.predict_day(h);

            // Uncertainty compounds with distance into the future.
            let half_width = INTERVAL_Z * self.params.residual_std * offset.sqrt();
            let lower = (predicted - half_width).max(0.0);
            let mut upper = predicted + half_width;

            // The zero clamp on the lower bound must not shrink the interval
            // relative to nearer days; widen the upper bound instead.
            if upper - lower < min_width {
                upper = lower + min_width;
            }
            min_width = upper - lower;

            let model_confidence =
                (base_confidence - CONFIDENCE_DECAY * (offset - 1.0)).max(floor);

            points.push(ForecastPoint {
                date,
                predicted_demand: predicted,
                confidence_lower: lower,
                confidence_upper: upper,
                model_confidence,
            });
        }

        Ok(points)
    }

    fn predict_day(&self, h: u32) -> f64 {
        let p = &self.params;
        let t = (p.window_len as f64 - 1.0) + h as f64;
        let base = p.intercept + p.slope * t;
        let weekday = (self.last_date + Duration::days(h as i64))
            .weekday()
            .num_days_from_monday() as usize;
        (base * p.weekday_factors[weekday]).max(0.0)
    }
}

fn fit_parameters(series: &[DailySales]) -> FitParams {
    let feature_vectors = features::build_features(series);
    let values: Vec<f64> = feature_vectors.iter().map(|f| f.units_sold).collect();
    let mean_demand = values.iter().sum::<f64>() / values.len() as f64;

    // Multiplicative weekday profile over the full series.
    let mut weekday_sums = [0.0_f64; 7];
    let mut weekday_counts = [0u32; 7];
    for feature in &feature_vectors {
        let w = feature.day_of_week as usize;
        weekday_sums[w] += feature.units_sold;
        weekday_counts[w] += 1;
    }
    let mut weekday_factors = [1.0_f64; 7];
    if mean_demand > 0.0 {
        for w in 0..7 {
            if weekday_counts[w] > 0 {
                weekday_factors[w] = (weekday_sums[w] / weekday_counts[w] as f64) / mean_demand;
            }
        }
    }

    // Level and slope from the trailing window only.
    let window_len = series.len().min(SEQUENCE_LENGTH);
    let window = &values[values.len() - window_len..];
    let (intercept, slope) = features::linear_fit(window);

    // Residual dispersion of the fitted model over the same window.
    let window_features = &feature_vectors[feature_vectors.len() - window_len..];
    let residuals: Vec<f64> = window_features
        .iter()
        .enumerate()
        .map(|(t, feature)| {
            let base = intercept + slope * t as f64;
            let predicted = (base * weekday_factors[feature.day_of_week as usize]).max(0.0);
            feature.units_sold - predicted
        })
        .collect();
    let residual_std = features::mean_std(&residuals).1;

    FitParams {
        intercept,
        slope,
        window_len,
        weekday_factors,
        residual_std,
        mean_demand,
    }
}

/// Chronological 80/20 split: fit on the prefix, score the holdout.
fn holdout_metrics(series: &[DailySales]) -> Option<ModelMetrics> {
    let holdout_len = (series.len() / 5).max(5);
    if series.len() <= holdout_len + SEQUENCE_LENGTH / 2 {
        return None;
    }
    let split = series.len() - holdout_len;
    let params = fit_parameters(&series[..split]);
    let last_date = series[split - 1].date;

    let actual: Vec<f64> = series[split..].iter().map(|d| d.units_sold as f64).collect();
    let predicted: Vec<f64> = (1..=holdout_len as u32)
        .map(|h| {
            let t = (params.window_len as f64 - 1.0) + h as f64;
            let base = params.intercept + params.slope * t;
            let w = (last_date + Duration::days(h as i64))
                .weekday()
                .num_days_from_monday() as usize;
            (base * params.weekday_factors[w]).max(0.0)
        })
        .collect();

    Some(evaluate(&actual, &predicted))
}

fn evaluate(actual: &[f64], predicted: &[f64]) -> ModelMetrics {
    let n = actual.len() as f64;

    let mae = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n;

    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n;

    let percentage_errors: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a > 0.0)
        .map(|(a, p)| ((a - p) / a).abs() * 100.0)
        .collect();
    let mape = if percentage_errors.is_empty() {
        None
    } else {
        Some(percentage_errors.iter().sum::<f64>() / percentage_errors.len() as f64)
    };

    let actual_mean = actual.iter().sum::<f64>() / n;
    let ss_tot = actual.iter().map(|a| (a - actual_mean).powi(2)).sum::<f64>();
    let ss_res = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>();
    let r2 = if ss_tot <= f64::EPSILON {
        if ss_res <= f64::EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    ModelMetrics {
        mape,
        rmse: mse.sqrt(),
        mae,
        r2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(start: NaiveDate, values: &[u32]) -> Vec<DailySales> {
        values
            .iter()
            .enumerate()
            .map(|(i, &units_sold)| DailySales {
                date: start + Duration::days(i as i64),
                units_sold,
            })
            .collect()
    }

    fn noisy_series(days: usize) -> Vec<DailySales> {
        // Deterministic pseudo-noise around a weekly pattern
        let values: Vec<u32> = (0..days)
            .map(|i| {
                let weekly = if i % 7 >= 5 { 30 } else { 50 };
                let wobble = ((i * 13 + 7) % 11) as u32;
                weekly + wobble
            })
            .collect();
        series(date(2025, 1, 6), &values)
    }

    #[test]
    fn refuses_short_series() {
        let err = DemandModel::fit(&series(date(2025, 1, 6), &[5; 29])).unwrap_err();
        assert_matches!(
            err,
            EngineError::InsufficientTrainingData {
                required: 30,
                actual: 29
            }
        );
    }

    #[test]
    fn trains_with_quality_flag_below_production_minimum() {
        let model = DemandModel::fit(&noisy_series(45)).unwrap();
        assert_eq!(model.quality, TrainingQuality::BelowProductionMinimum);

        let model = DemandModel::fit(&noisy_series(120)).unwrap();
        assert_eq!(model.quality, TrainingQuality::Production);
        assert!(model.metrics.is_some());
    }

    #[test]
    fn forecast_is_deterministic() {
        let model = DemandModel::fit(&noisy_series(90)).unwrap();
        let a = model.forecast(14).unwrap();
        let b = model.forecast(14).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn forecast_dates_continue_the_series() {
        let model = DemandModel::fit(&noisy_series(60)).unwrap();
        let forecast = model.forecast(3).unwrap();
        assert_eq!(forecast[0].date, model.last_date() + Duration::days(1));
        assert_eq!(forecast[2].date, model.last_date() + Duration::days(3));
    }

    #[test]
    fn interval_width_never_decreases() {
        let model = DemandModel::fit(&noisy_series(120)).unwrap();
        let forecast = model.forecast(30).unwrap();
        let mut prev_width = 0.0;
        for point in &forecast {
            let width = point.confidence_upper - point.confidence_lower;
            assert!(
                width >= prev_width - 1e-9,
                "width shrank: {} < {}",
                width,
                prev_width
            );
            assert!(point.confidence_lower <= point.predicted_demand);
            assert!(point.predicted_demand <= point.confidence_upper);
            prev_width = width;
        }
    }

    #[test]
    fn confidence_decays_monotonically() {
        let model = DemandModel::fit(&noisy_series(120)).unwrap();
        let forecast = model.forecast(30).unwrap();
        let mut prev = f64::INFINITY;
        for point in &forecast {
            assert!(point.model_confidence <= prev + 1e-12);
            prev = point.model_confidence;
        }
        assert!((forecast[0].model_confidence - 0.85).abs() < 1e-9);
        assert!(forecast.last().unwrap().model_confidence >= 0.5);
    }

    #[test]
    fn flat_series_collapses_the_band() {
        let model = DemandModel::fit(&series(date(2025, 1, 6), &[10; 35])).unwrap();
        let forecast = model.forecast(7).unwrap();
        for point in &forecast {
            assert!((point.predicted_demand - 10.0).abs() < 1e-6);
            assert!(point.confidence_upper - point.confidence_lower < 1e-6);
        }
    }

    #[test]
    fn degenerate_series_pins_confidence_near_zero() {
        let model = DemandModel::fit(&series(date(2025, 1, 6), &[0; 40])).unwrap();
        assert!(model.is_degenerate());
        let forecast = model.forecast(5).unwrap();
        for point in &forecast {
            assert!(point.model_confidence <= CONFIDENCE_BASE_DEGENERATE);
            assert_eq!(point.predicted_demand, 0.0);
        }
    }

    #[test]
    fn horizon_is_bounded() {
        let model = DemandModel::fit(&noisy_series(40)).unwrap();
        assert_matches!(model.forecast(0), Err(EngineError::InvalidHorizon(0)));
        assert_matches!(model.forecast(31), Err(EngineError::InvalidHorizon(31)));
        assert!(model.forecast(30).is_ok());
    }

    #[test]
    fn weekend_profile_shows_up_in_the_forecast() {
        // Weekdays sell 50, weekends 10, for 10 full weeks
        let values: Vec<u32> = (0..70).map(|i| if i % 7 >= 5 { 10 } else { 50 }).collect();
        let model = DemandModel::fit(&series(date(2025, 1, 6), &values)).unwrap();
        let forecast = model.forecast(7).unwrap();

        // Series starts Monday, so offsets 6 and 7 from the last Sunday are
        // Saturday and Sunday
        let weekend: Vec<&ForecastPoint> = forecast
            .iter()
            .filter(|p| p.date.weekday().num_days_from_monday() >= 5)
            .collect();
        let weekday_avg = forecast
            .iter()
            .filter(|p| p.date.weekday().num_days_from_monday() < 5)
            .map(|p| p.predicted_demand)
            .sum::<f64>()
            / 5.0;
        for point in weekend {
            assert!(
                point.predicted_demand < weekday_avg,
                "weekend {} not below weekday average {}",
                point.predicted_demand,
                weekday_avg
            );
        }
    }
}
