//! Statistical anomaly detection over a recent sales window.
//!
//! Each day is scored against a trailing baseline (mean and dispersion over
//! the preceding window). A dispersion floor keeps a perfectly flat baseline
//! from dividing by ~zero while still letting a genuine jump register as
//! extreme. Sensitivity cutoffs are configuration, not constants: the
//! dashboard exposes a sensitivity control and may override them per
//! request.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ml::features::{self, DailySales};

/// Sensitivity settings for the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields, default)]
pub struct SensitivityConfig {
    /// |z| at or above this is a spike/drop.
    pub threshold_z: f64,
    /// Severity band cutoffs on |z|.
    pub medium_z: f64,
    pub high_z: f64,
    /// Trailing days used as the baseline for each scored day.
    pub baseline_window: usize,
    /// Dispersion floor: sigma is at least `max(frac·mean, abs)`.
    pub min_sigma_fraction: f64,
    pub min_sigma_abs: f64,
    /// Alternating above/below-baseline days needed for `unusual_pattern`.
    pub pattern_streak: usize,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            threshold_z: 2.0,
            medium_z: 3.0,
            high_z: 4.0,
            baseline_window: 14,
            min_sigma_fraction: 0.05,
            min_sigma_abs: 0.5,
            pattern_streak: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Spike,
    Drop,
    UnusualPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Anomaly {
    pub id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: String,
    pub sku_id: String,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub observed: f64,
    pub expected: f64,
    pub deviation_z: f64,
    /// Signed percentage deviation from the baseline expectation.
    pub impact_percentage: f64,
    pub suggested_action: String,
}

/// Result of one detection run. `window_sufficient` is false when the window
/// was too short for reliable statistics, which is distinct from "no
/// anomalies found".
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DetectionOutcome {
    pub anomalies: Vec<Anomaly>,
    pub window_days: usize,
    pub window_sufficient: bool,
}

/// Decision table for the operator guidance attached to each anomaly.
pub fn suggested_action(anomaly_type: AnomalyType, severity: Severity) -> &'static str {
    use AnomalyType::*;
    use Severity::*;
    match (anomaly_type, severity) {
        (Spike, High) => "Verify stock levels and expedite replenishment for this SKU",
        (Spike, Medium) => "Check for promotions or bulk orders before adjusting the forecast",
        (Spike, Low) => "Monitor the next few days before acting",
        (Drop, High) => "Check for stockouts, listing errors, or fulfillment outages",
        (Drop, Medium) => "Confirm warehouse availability and competing channels",
        (Drop, Low) => "Monitor; a single soft day is usually noise",
        (UnusualPattern, High) => "Escalate the demand pattern to the planning team",
        (UnusualPattern, Medium) => "Review recent ordering behavior for this SKU",
        (UnusualPattern, Low) => "Track the pattern; no immediate action needed",
    }
}

pub struct AnomalyDetectionService {
    defaults: SensitivityConfig,
}

impl AnomalyDetectionService {
    pub fn new(defaults: SensitivityConfig) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &SensitivityConfig {
        &self.defaults
    }

    /// Scores a recent window for one (warehouse, SKU) pair.
    ///
    /// A window too short for the baseline returns an empty outcome with
    /// `window_sufficient = false` rather than an error.
    #[instrument(skip(self, window, overrides))]
    pub fn detect(
        &self,
        warehouse_id: &str,
        sku_id: &str,
        window: &[DailySales],
        overrides: Option<SensitivityConfig>,
    ) -> DetectionOutcome {
        let config = overrides.unwrap_or_else(|| self.defaults.clone());
        let series = features::zero_fill(window);

        if series.len() < config.baseline_window + 1 {
            warn!(
                warehouse_id,
                sku_id,
                window_days = series.len(),
                required = config.baseline_window + 1,
                "window too short for anomaly statistics"
            );
            return DetectionOutcome {
                anomalies: Vec::new(),
                window_days: series.len(),
                window_sufficient: false,
            };
        }

        let values: Vec<f64> = series.iter().map(|d| d.units_sold as f64).collect();
        let mut deviations: Vec<f64> = vec![0.0; series.len()];
        let mut anomalies = Vec::new();

        for i in config.baseline_window..series.len() {
            let baseline = &values[i - config.baseline_window..i];
            let (mean, std) = features::mean_std(baseline);
            let sigma = std
                .max(mean * config.min_sigma_fraction)
                .max(config.min_sigma_abs);
            let observed = values[i];
            let z = (observed - mean) / sigma;
            deviations[i] = observed - mean;

            let classified = classify(z, &config, &deviations[..=i]);
            if let Some((anomaly_type, severity)) = classified {
                let impact_percentage = if mean.abs() > f64::EPSILON {
                    (observed - mean) / mean * 100.0
                } else if observed > 0.0 {
                    100.0
                } else {
                    0.0
                };

                anomalies.push(Anomaly {
                    id: Uuid::new_v4(),
                    date: series[i].date,
                    warehouse_id: warehouse_id.to_string(),
                    sku_id: sku_id.to_string(),
                    anomaly_type,
                    severity,
                    observed,
                    expected: mean,
                    deviation_z: z,
                    impact_percentage,
                    suggested_action: suggested_action(anomaly_type, severity).to_string(),
                });
            }
        }

        DetectionOutcome {
            window_days: series.len(),
            window_sufficient: true,
            anomalies,
        }
    }
}

fn severity_for(z_abs: f64, config: &SensitivityConfig) -> Severity {
    if z_abs >= config.high_z {
        Severity::High
    } else if z_abs >= config.medium_z {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Classifies the day at the end of `deviations`. Spikes and drops come from
/// the standardized deviation alone; an `unusual_pattern` is a moderate
/// deviation whose trailing days alternate above and below the baseline.
fn classify(
    z: f64,
    config: &SensitivityConfig,
    deviations: &[f64],
) -> Option<(AnomalyType, Severity)> {
    let z_abs = z.abs();
    if z_abs >= config.threshold_z {
        let anomaly_type = if z > 0.0 {
            AnomalyType::Spike
        } else {
            AnomalyType::Drop
        };
        return Some((anomaly_type, severity_for(z_abs, config)));
    }

    let moderate_floor = config.threshold_z * 0.6;
    if z_abs >= moderate_floor && sign_flip_streak(deviations, config.pattern_streak) {
        return Some((AnomalyType::UnusualPattern, severity_for(z_abs, config)));
    }

    None
}

/// True when the last `streak` deviations alternate in sign.
fn sign_flip_streak(deviations: &[f64], streak: usize) -> bool {
    if streak < 2 || deviations.len() < streak {
        return false;
    }
    let tail = &deviations[deviations.len() - streak..];
    tail.windows(2).all(|pair| pair[0] * pair[1] < 0.0)
}
