//! Turns a raw per-day sales series into the feature vectors consumed by the
//! forecaster and the anomaly detector.
//!
//! Input series are normalized to contiguous daily granularity first: missing
//! days are filled with zero units sold (an explicit zero-fill policy, so the
//! rolling windows always cover a fixed span), and duplicate dates collapse
//! to the most recent record.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Trailing window for rolling statistics.
pub const ROLLING_WINDOW: usize = 7;

/// Minimum contiguous days required by consumers that need a full
/// sequence window (forecaster training and inference).
pub const MIN_HISTORY_DAYS: usize = 30;

/// One day of a (warehouse, SKU) sales series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySales {
    pub date: NaiveDate,
    pub units_sold: u32,
}

/// Engineered features for one day of a series.
///
/// `rolling_mean_7`, `rolling_std_7`, and `trend` are `None` for the first
/// `ROLLING_WINDOW - 1` days: there is not enough trailing history for the
/// window, and that is reported as absence rather than NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub date: NaiveDate,
    pub units_sold: f64,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    /// 1..=12
    pub month: u32,
    /// 1..=4
    pub quarter: u32,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub rolling_mean_7: Option<f64>,
    pub rolling_std_7: Option<f64>,
    /// Slope of a linear fit over the trailing window (units/day).
    pub trend: Option<f64>,
}

/// Exact-date holiday match: New Year's Day, Independence Day, Christmas Day.
/// No observed-date shifting.
pub fn is_holiday(date: NaiveDate) -> bool {
    matches!((date.month(), date.day()), (1, 1) | (7, 4) | (12, 25))
}

/// Normalizes raw records to a contiguous daily series.
///
/// Records are sorted by date, duplicates collapse to the latest-seen value,
/// and gaps are filled with zero units sold. Returns an empty vec for empty
/// input.
pub fn zero_fill(records: &[DailySales]) -> Vec<DailySales> {
    if records.is_empty() {
        return Vec::new();
    }

    let mut by_date: std::collections::BTreeMap<NaiveDate, u32> = std::collections::BTreeMap::new();
    for record in records {
        by_date.insert(record.date, record.units_sold);
    }

    let first = *by_date.keys().next().expect("non-empty map");
    let last = *by_date.keys().next_back().expect("non-empty map");

    let mut series = Vec::with_capacity((last - first).num_days() as usize + 1);
    let mut date = first;
    while date <= last {
        series.push(DailySales {
            date,
            units_sold: by_date.get(&date).copied().unwrap_or(0),
        });
        date = date + Duration::days(1);
    }
    series
}

/// Fails with `InsufficientHistory` when the series is shorter than
/// `required` days.
pub fn ensure_min_history(series: &[DailySales], required: usize) -> Result<(), EngineError> {
    if series.len() < required {
        return Err(EngineError::InsufficientHistory {
            required,
            actual: series.len(),
        });
    }
    Ok(())
}

/// Builds one feature vector per day of a contiguous series.
pub fn build_features(series: &[DailySales]) -> Vec<FeatureVector> {
    let values: Vec<f64> = series.iter().map(|d| d.units_sold as f64).collect();

    series
        .iter()
        .enumerate()
        .map(|(i, day)| {
            let day_of_week = day.date.weekday().num_days_from_monday();
            let month = day.date.month();

            let (rolling_mean_7, rolling_std_7, trend) = if i + 1 >= ROLLING_WINDOW {
                let window = &values[i + 1 - ROLLING_WINDOW..=i];
                let (mean, std) = mean_std(window);
                (Some(mean), Some(std), Some(linear_slope(window)))
            } else {
                (None, None, None)
            };

            FeatureVector {
                date: day.date,
                units_sold: day.units_sold as f64,
                day_of_week,
                month,
                quarter: (month - 1) / 3 + 1,
                is_weekend: day_of_week >= 5,
                is_holiday: is_holiday(day.date),
                rolling_mean_7,
                rolling_std_7,
                trend,
            }
        })
        .collect()
}

/// Mean and sample standard deviation. Std is 0 for windows shorter than 2.
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Ordinary least-squares slope of `values` against their indices.
pub(crate) fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// OLS intercept + slope over indices 0..n.
pub(crate) fn linear_fit(values: &[f64]) -> (f64, f64) {
    let slope = linear_slope(values);
    let n_f = values.len() as f64;
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let y_mean = values.iter().sum::<f64>() / n_f;
    let x_mean = (n_f - 1.0) / 2.0;
    (y_mean - slope * x_mean, slope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series_from(start: NaiveDate, values: &[u32]) -> Vec<DailySales> {
        values
            .iter()
            .enumerate()
            .map(|(i, &units_sold)| DailySales {
                date: start + Duration::days(i as i64),
                units_sold,
            })
            .collect()
    }

    #[test]
    fn zero_fill_closes_gaps_and_overwrites_duplicates() {
        let records = vec![
            DailySales {
                date: date(2025, 3, 1),
                units_sold: 5,
            },
            DailySales {
                date: date(2025, 3, 4),
                units_sold: 7,
            },
            // later record for the same date wins
            DailySales {
                date: date(2025, 3, 1),
                units_sold: 9,
            },
        ];

        let series = zero_fill(&records);
        assert_eq!(series.len(), 4);
        assert_eq!(series[0].units_sold, 9);
        assert_eq!(series[1].units_sold, 0);
        assert_eq!(series[2].units_sold, 0);
        assert_eq!(series[3].units_sold, 7);
    }

    #[test]
    fn calendar_features_follow_the_contract() {
        // 2025-03-03 is a Monday
        let series = series_from(date(2025, 3, 3), &[1, 2, 3, 4, 5, 6, 7]);
        let features = build_features(&series);

        assert_eq!(features[0].day_of_week, 0);
        assert!(!features[0].is_weekend);
        assert_eq!(features[5].day_of_week, 5); // Saturday
        assert!(features[5].is_weekend);
        assert!(features[6].is_weekend); // Sunday
        assert_eq!(features[0].month, 3);
        assert_eq!(features[0].quarter, 1);
    }

    #[test]
    fn holidays_are_exact_date_matches() {
        assert!(is_holiday(date(2025, 1, 1)));
        assert!(is_holiday(date(2025, 7, 4)));
        assert!(is_holiday(date(2025, 12, 25)));
        assert!(!is_holiday(date(2025, 12, 24)));
        // July 4 on a Saturday is not shifted to July 3
        assert!(!is_holiday(date(2026, 7, 3)));
    }

    #[test]
    fn rolling_stats_absent_before_a_full_window() {
        let series = series_from(date(2025, 3, 3), &[10; 10]);
        let features = build_features(&series);

        for f in &features[..ROLLING_WINDOW - 1] {
            assert!(f.rolling_mean_7.is_none());
            assert!(f.rolling_std_7.is_none());
            assert!(f.trend.is_none());
        }
        let full = &features[ROLLING_WINDOW - 1];
        assert_eq!(full.rolling_mean_7, Some(10.0));
        assert_eq!(full.rolling_std_7, Some(0.0));
        assert_eq!(full.trend, Some(0.0));
    }

    #[test]
    fn trend_tracks_a_linear_ramp() {
        let series = series_from(date(2025, 3, 3), &[0, 2, 4, 6, 8, 10, 12, 14]);
        let features = build_features(&series);
        let trend = features.last().unwrap().trend.unwrap();
        assert!((trend - 2.0).abs() < 1e-9, "slope was {}", trend);
    }

    #[test]
    fn min_history_is_enforced() {
        let series = series_from(date(2025, 3, 3), &[1; 12]);
        let err = ensure_min_history(&series, MIN_HISTORY_DAYS).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientHistory {
                required: 30,
                actual: 12
            }
        ));
        assert!(ensure_min_history(&series, 10).is_ok());
    }

    #[test]
    fn sample_std_matches_hand_computation() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((std - 2.138089935299395).abs() < 1e-9);
    }
}
