//! In-process store of ingested sales series.
//!
//! Records are keyed by (warehouse_id, sku_id, date); at most one record per
//! key per day, later uploads overwrite by key. Each series carries a data
//! version, bumped on every merge, which keys the forecast cache.
//!
//! This is deliberately not a database: the engine is a request-scoped
//! decision service and the durable sales ledger belongs to the caller.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ml::features::{self, DailySales};
use crate::ml::registry::ModelKey;

/// One ingested sales record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesRecord {
    pub date: NaiveDate,
    pub warehouse_id: String,
    pub sku_id: String,
    pub units_sold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Default)]
struct SeriesEntry {
    days: BTreeMap<NaiveDate, u32>,
    version: u64,
}

/// Outcome of a merge: how many records landed and how many series changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct MergeOutcome {
    pub records: usize,
    pub series_touched: usize,
}

/// Concurrent sales-series store.
#[derive(Default)]
pub struct SalesStore {
    series: DashMap<ModelKey, SeriesEntry>,
}

impl SalesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts records by (warehouse, sku, date). Bumps the data version of
    /// every touched series exactly once.
    pub fn merge(&self, records: &[SalesRecord]) -> MergeOutcome {
        let mut touched: std::collections::HashSet<ModelKey> = std::collections::HashSet::new();

        for record in records {
            let key = ModelKey::new(record.warehouse_id.clone(), record.sku_id.clone());
            let mut entry = self.series.entry(key.clone()).or_default();
            entry.days.insert(record.date, record.units_sold);
            touched.insert(key);
        }

        for key in &touched {
            if let Some(mut entry) = self.series.get_mut(key) {
                entry.version += 1;
            }
        }

        MergeOutcome {
            records: records.len(),
            series_touched: touched.len(),
        }
    }

    /// Zero-filled contiguous daily series for a key, oldest first.
    pub fn series(&self, key: &ModelKey) -> Option<Vec<DailySales>> {
        let entry = self.series.get(key)?;
        let sparse: Vec<DailySales> = entry
            .days
            .iter()
            .map(|(&date, &units_sold)| DailySales { date, units_sold })
            .collect();
        if sparse.is_empty() {
            return None;
        }
        Some(features::zero_fill(&sparse))
    }

    /// Current data version for a key; bumped on every merge.
    pub fn version(&self, key: &ModelKey) -> Option<u64> {
        self.series.get(key).map(|entry| entry.version)
    }

    /// Number of distinct observed days for a key (before zero-fill).
    pub fn observed_days(&self, key: &ModelKey) -> usize {
        self.series
            .get(key)
            .map(|entry| entry.days.len())
            .unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<ModelKey> {
        self.series.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(d: NaiveDate, units: u32) -> SalesRecord {
        SalesRecord {
            date: d,
            warehouse_id: "WH001".into(),
            sku_id: "SKU-001".into(),
            units_sold: units,
            revenue: None,
            order_id: None,
            client_id: None,
        }
    }

    #[test]
    fn merge_overwrites_by_key_and_date() {
        let store = SalesStore::new();
        let key = ModelKey::new("WH001", "SKU-001");

        store.merge(&[record(date(2025, 2, 1), 5), record(date(2025, 2, 3), 7)]);
        store.merge(&[record(date(2025, 2, 1), 9)]);

        let series = store.series(&key).unwrap();
        assert_eq!(series.len(), 3); // zero-filled Feb 1..3
        assert_eq!(series[0].units_sold, 9);
        assert_eq!(series[1].units_sold, 0);
        assert_eq!(series[2].units_sold, 7);
        assert_eq!(store.observed_days(&key), 2);
    }

    #[test]
    fn version_bumps_once_per_merge() {
        let store = SalesStore::new();
        let key = ModelKey::new("WH001", "SKU-001");

        store.merge(&[record(date(2025, 2, 1), 5), record(date(2025, 2, 2), 6)]);
        assert_eq!(store.version(&key), Some(1));

        store.merge(&[record(date(2025, 2, 3), 7)]);
        assert_eq!(store.version(&key), Some(2));
    }

    #[test]
    fn series_are_isolated_per_key() {
        let store = SalesStore::new();
        let mut other = record(date(2025, 2, 1), 5);
        other.sku_id = "SKU-002".into();

        let outcome = store.merge(&[record(date(2025, 2, 1), 1), other]);
        assert_eq!(outcome.series_touched, 2);
        assert_eq!(store.observed_days(&ModelKey::new("WH001", "SKU-001")), 1);
        assert_eq!(store.observed_days(&ModelKey::new("WH001", "SKU-002")), 1);
        assert_eq!(store.version(&ModelKey::new("WH001", "SKU-002")), Some(1));
    }

    #[test]
    fn missing_key_yields_no_series() {
        let store = SalesStore::new();
        assert!(store.series(&ModelKey::new("WH404", "SKU-404")).is_none());
        assert_eq!(store.version(&ModelKey::new("WH404", "SKU-404")), None);
    }
}
