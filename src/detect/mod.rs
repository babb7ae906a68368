//! Rolling-threshold anomaly detection over a single series.

pub mod anomaly;
pub mod engine;
pub mod floor;

use chrono::{DateTime, Utc};

use crate::error::AnalysisError;
use crate::series::{SeriesKey, TimeWindow};

/// One single-series analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub key: SeriesKey,
    pub window: TimeWindow,
    /// Number of trailing samples in the rolling baseline.
    pub window_size: usize,
    /// Band half-width in standard deviations.
    pub k: f64,
}

impl AnalysisRequest {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        anomaly::validate_params(self.window_size, self.k)
    }
}

/// Detection output for one series, index-aligned with `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub anomaly_timestamps: Vec<DateTime<Utc>>,
    pub anomaly_values: Vec<f64>,
    pub total_records: usize,
    pub anomaly_count: usize,
    pub anomaly_rate: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
    pub min_absolute_threshold: f64,
}

impl AnalysisResult {
    /// Refresh `anomaly_count` and `anomaly_rate` from the anomaly lists.
    pub(crate) fn recount(&mut self) {
        self.anomaly_count = self.anomaly_values.len();
        self.anomaly_rate = if self.total_records > 0 {
            self.anomaly_count as f64 / self.total_records as f64
        } else {
            0.0
        };
    }
}
