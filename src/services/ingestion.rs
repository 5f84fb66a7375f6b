//! CSV sales ingestion.
//!
//! Accepts the dashboard's export format:
//! `date,warehouse_id,sku_id,units_sold,revenue,order_id,client_id`.
//! Dates are strictly `YYYY-MM-DD` and numeric fields must be non-negative.
//! Malformed rows are rejected individually with row-level detail; the whole
//! upload is only refused when the malformed fraction crosses the configured
//! quality threshold.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::errors::EngineError;
use crate::services::sales_data::{SalesRecord, SalesStore};

const REQUIRED_COLUMNS: [&str; 4] = ["date", "warehouse_id", "sku_id", "units_sold"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ingestion quality thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IngestionConfig {
    /// Reject the whole upload when more than this fraction of rows is
    /// malformed.
    pub max_rejected_fraction: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_rejected_fraction: 0.25,
        }
    }
}

/// One rejected row and why.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RowError {
    /// 1-based data row number (excluding the header).
    pub row: usize,
    pub reason: String,
}

/// Observed date span of the accepted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Outcome of one upload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<RowError>,
    pub series_touched: usize,
    pub warehouses: usize,
    pub skus: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

pub struct IngestionService {
    store: Arc<SalesStore>,
    config: IngestionConfig,
}

impl IngestionService {
    pub fn new(store: Arc<SalesStore>, config: IngestionConfig) -> Self {
        Self { store, config }
    }

    /// Parses and merges a CSV upload into the sales store.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub fn ingest_csv(&self, body: &str) -> Result<IngestReport, EngineError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(body.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| EngineError::ValidationError(format!("unreadable CSV header: {}", e)))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        for required in REQUIRED_COLUMNS {
            if column(required).is_none() {
                return Err(EngineError::ValidationError(format!(
                    "missing required column '{}'",
                    required
                )));
            }
        }

        let idx_date = column("date").expect("checked above");
        let idx_warehouse = column("warehouse_id").expect("checked above");
        let idx_sku = column("sku_id").expect("checked above");
        let idx_units = column("units_sold").expect("checked above");
        let idx_revenue = column("revenue");
        let idx_order = column("order_id");
        let idx_client = column("client_id");

        let mut accepted: Vec<SalesRecord> = Vec::new();
        let mut rejected: Vec<RowError> = Vec::new();
        let mut total_rows = 0usize;

        for (row_idx, result) in reader.records().enumerate() {
            let row = row_idx + 1;
            total_rows += 1;

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    rejected.push(RowError {
                        row,
                        reason: format!("unparseable row: {}", e),
                    });
                    continue;
                }
            };

            match parse_row(
                &record,
                idx_date,
                idx_warehouse,
                idx_sku,
                idx_units,
                idx_revenue,
                idx_order,
                idx_client,
            ) {
                Ok(sales_record) => accepted.push(sales_record),
                Err(reason) => rejected.push(RowError { row, reason }),
            }
        }

        if total_rows == 0 {
            return Err(EngineError::ValidationError(
                "upload contains no data rows".to_string(),
            ));
        }

        let rejected_fraction = rejected.len() as f64 / total_rows as f64;
        if rejected_fraction > self.config.max_rejected_fraction {
            return Err(EngineError::IngestionRejected {
                rejected: rejected.len(),
                total: total_rows,
                row_errors: rejected,
            });
        }

        let outcome = self.store.merge(&accepted);
        let date_range = accepted
            .iter()
            .map(|r| r.date)
            .fold(None, |range: Option<DateRange>, date| {
                Some(match range {
                    None => DateRange {
                        start: date,
                        end: date,
                    },
                    Some(existing) => DateRange {
                        start: existing.start.min(date),
                        end: existing.end.max(date),
                    },
                })
            });

        let warehouses = accepted
            .iter()
            .map(|r| r.warehouse_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let skus = accepted
            .iter()
            .map(|r| (r.warehouse_id.as_str(), r.sku_id.as_str()))
            .collect::<std::collections::HashSet<_>>()
            .len();

        info!(
            accepted = accepted.len(),
            rejected = rejected.len(),
            series_touched = outcome.series_touched,
            "sales upload merged"
        );

        Ok(IngestReport {
            accepted: accepted.len(),
            rejected,
            series_touched: outcome.series_touched,
            warehouses,
            skus,
            date_range,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_row(
    record: &csv::StringRecord,
    idx_date: usize,
    idx_warehouse: usize,
    idx_sku: usize,
    idx_units: usize,
    idx_revenue: Option<usize>,
    idx_order: Option<usize>,
    idx_client: Option<usize>,
) -> Result<SalesRecord, String> {
    let field = |idx: usize| record.get(idx).unwrap_or("").trim();

    let date_raw = field(idx_date);
    let date = NaiveDate::parse_from_str(date_raw, DATE_FORMAT)
        .map_err(|_| format!("invalid date '{}': expected YYYY-MM-DD", date_raw))?;

    let warehouse_id = field(idx_warehouse);
    if warehouse_id.is_empty() {
        return Err("empty warehouse_id".to_string());
    }
    let sku_id = field(idx_sku);
    if sku_id.is_empty() {
        return Err("empty sku_id".to_string());
    }

    let units_raw = field(idx_units);
    let units_sold: u32 = units_raw
        .parse()
        .map_err(|_| format!("invalid units_sold '{}': expected a non-negative integer", units_raw))?;

    let revenue = match idx_revenue.map(field).filter(|v| !v.is_empty()) {
        Some(raw) => {
            let value: f64 = raw
                .parse()
                .map_err(|_| format!("invalid revenue '{}': expected a number", raw))?;
            if value < 0.0 {
                return Err(format!("negative revenue '{}'", raw));
            }
            Some(value)
        }
        None => None,
    };

    let optional = |idx: Option<usize>| {
        idx.map(field)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    Ok(SalesRecord {
        date,
        warehouse_id: warehouse_id.to_string(),
        sku_id: sku_id.to_string(),
        units_sold,
        revenue,
        order_id: optional(idx_order),
        client_id: optional(idx_client),
    })
}
