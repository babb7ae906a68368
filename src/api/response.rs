//! Wire payloads and the `success: false` failure envelope.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::analysis::chart::PairSeries;
use crate::analysis::correlation::{CorrelationPair, CorrelationReport};
use crate::analysis::stats::SummaryStats;
use crate::detect::engine::{AnomalousCombination, CombinationsReport};
use crate::detect::AnalysisResult;
use crate::error::AnalysisError;
use crate::series::time::CivilZone;
use crate::series::{DatasetKind, MetricInfo, SeriesKey, TimePoint, TimeWindow};
use crate::storage::{DataRange, NodeRange};

// ---------------------------------------------------------------------------
// Failure envelope
// ---------------------------------------------------------------------------

/// Any handler failure. Rendered as `{"success": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Domain failures travel as HTTP 200 so the dashboard can read `error`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match &err {
            AnalysisError::UpstreamUnavailable(_) => tracing::error!(error = %err, "data source failure"),
            _ => tracing::debug!(error = %err, "request rejected"),
        }
        Self::failure(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        AnalysisError::upstream(format!("{err:#}")).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnalysisPayload {
    pub success: bool,
    pub timestamps: Vec<String>,
    pub values: Vec<f64>,
    /// `null` during warm-up.
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub anomaly_timestamps: Vec<String>,
    pub anomaly_values: Vec<f64>,
    pub total_records: usize,
    pub anomaly_count: usize,
    pub anomaly_rate: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
    pub min_absolute_threshold: f64,
}

impl AnalysisPayload {
    pub fn new(result: AnalysisResult, zone: &CivilZone) -> Self {
        Self {
            success: true,
            timestamps: result.timestamps.iter().map(|t| zone.format(*t)).collect(),
            values: result.values,
            upper: result.upper,
            lower: result.lower,
            anomaly_timestamps: result.anomaly_timestamps.iter().map(|t| zone.format(*t)).collect(),
            anomaly_values: result.anomaly_values,
            total_records: result.total_records,
            anomaly_count: result.anomaly_count,
            anomaly_rate: result.anomaly_rate,
            min_value: result.min_value,
            max_value: result.max_value,
            avg_value: result.avg_value,
            min_absolute_threshold: result.min_absolute_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Anomalous combinations
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CombinationItem {
    pub node: String,
    pub relatedci: String,
    pub metric: String,
    pub metric_label: String,
    pub anomaly_count: usize,
    pub mean_value: f64,
    pub std_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub first_anomaly: Option<String>,
    pub last_anomaly: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectionParams {
    pub window: usize,
    pub k: f64,
}

#[derive(Debug, Serialize)]
pub struct CombinationsSummary {
    pub total_records: usize,
    pub total_anomalies: usize,
    pub anomaly_rate: f64,
    pub unique_nodes: usize,
    pub unique_related_cis: usize,
    pub time_range: TimeRange,
    pub detection_params: DetectionParams,
}

#[derive(Debug, Serialize)]
pub struct CombinationsPayload {
    pub success: bool,
    pub anomalous_combinations: Vec<CombinationItem>,
    pub summary: CombinationsSummary,
}

fn metric_label(key: &SeriesKey) -> String {
    key.kind()
        .metric(key.metric())
        .map(|m| m.label.to_string())
        .unwrap_or_else(|_| key.metric().to_string())
}

impl CombinationsPayload {
    pub fn new(report: CombinationsReport, zone: &CivilZone) -> Self {
        let item = |c: AnomalousCombination| CombinationItem {
            node: c.key.node().to_string(),
            relatedci: c.key.related_ci().unwrap_or_default().to_string(),
            metric: c.key.metric().to_string(),
            metric_label: metric_label(&c.key),
            anomaly_count: c.anomaly_count,
            mean_value: c.mean_value,
            std_value: c.std_value,
            min_value: c.min_value,
            max_value: c.max_value,
            first_anomaly: c.first_anomaly.map(|t| zone.format(t)),
            last_anomaly: c.last_anomaly.map(|t| zone.format(t)),
        };

        Self {
            success: true,
            summary: CombinationsSummary {
                total_records: report.total_records,
                total_anomalies: report.total_anomalies,
                anomaly_rate: report.anomaly_rate,
                unique_nodes: report.unique_nodes,
                unique_related_cis: report.unique_related_cis,
                time_range: TimeRange {
                    start: report.first_timestamp.map(|t| zone.format(t)),
                    end: report.last_timestamp.map(|t| zone.format(t)),
                },
                detection_params: DetectionParams {
                    window: report.window_size,
                    k: report.k,
                },
            },
            anomalous_combinations: report.combinations.into_iter().map(item).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CorrelationItem {
    pub node1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relatedci1: Option<String>,
    pub metric1: String,
    pub node2: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relatedci2: Option<String>,
    pub metric2: String,
    pub correlation: f64,
    pub data_points: usize,
    pub common_timestamps: usize,
}

impl From<&CorrelationPair> for CorrelationItem {
    fn from(p: &CorrelationPair) -> Self {
        Self {
            node1: p.key_a.node().to_string(),
            relatedci1: p.key_a.related_ci().map(str::to_string),
            metric1: p.key_a.metric().to_string(),
            node2: p.key_b.node().to_string(),
            relatedci2: p.key_b.related_ci().map(str::to_string),
            metric2: p.key_b.metric().to_string(),
            correlation: p.coefficient,
            data_points: p.sample_count,
            common_timestamps: p.common_timestamp_count,
        }
    }
}

fn items(pairs: &[CorrelationPair]) -> Vec<CorrelationItem> {
    pairs.iter().map(CorrelationItem::from).collect()
}

#[derive(Debug, Serialize)]
pub struct PeriodBounds {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisPeriod {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Serialize)]
pub struct CorrelationResults {
    pub success: bool,
    pub total_correlations: usize,
    pub strong_correlations: Vec<CorrelationItem>,
    pub moderate_correlations: Vec<CorrelationItem>,
    pub weak_correlations: Vec<CorrelationItem>,
    pub all_correlations: Vec<CorrelationItem>,
    pub analysis_period: PeriodBounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_node_ci_combinations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_node_metric_combinations: Option<usize>,
    pub metrics_analyzed: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryPayload {
    pub success: bool,
    #[serde(flatten)]
    pub stats: SummaryStats,
}

#[derive(Debug, Serialize)]
pub struct CorrelationPayload {
    pub success: bool,
    pub correlation_results: CorrelationResults,
    pub summary_stats: SummaryPayload,
    pub analysis_period: AnalysisPeriod,
}

impl CorrelationPayload {
    pub fn new(kind: DatasetKind, report: CorrelationReport, window: &TimeWindow, zone: &CivilZone) -> Self {
        let start = zone.format(window.start());
        let end = zone.format(window.end());
        let (ci_combinations, metric_combinations) = match kind {
            DatasetKind::Transaction => (Some(report.subjects_analyzed), None),
            DatasetKind::Server => (None, Some(report.series_analyzed)),
        };

        Self {
            success: true,
            correlation_results: CorrelationResults {
                success: true,
                total_correlations: report.all_pairs.len(),
                strong_correlations: items(&report.strong),
                moderate_correlations: items(&report.moderate),
                weak_correlations: items(&report.weak),
                all_correlations: items(&report.all_pairs),
                analysis_period: PeriodBounds {
                    start: start.clone(),
                    end: end.clone(),
                },
                total_node_ci_combinations: ci_combinations,
                total_node_metric_combinations: metric_combinations,
                metrics_analyzed: report.metrics_analyzed,
            },
            summary_stats: SummaryPayload {
                success: true,
                stats: report.summary,
            },
            analysis_period: AnalysisPeriod {
                start_date: start,
                end_date: end,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Chart data
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SeriesData {
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relatedci: Option<String>,
    pub metric: String,
    pub metric_label: String,
    pub timestamps: Vec<String>,
    pub values: Vec<f64>,
    /// Values at `common_timestamps`, index-aligned with it.
    pub aligned_values: Vec<f64>,
    pub total_records: usize,
}

impl SeriesData {
    fn new(key: &SeriesKey, series: &[TimePoint], aligned_values: Vec<f64>, zone: &CivilZone) -> Self {
        Self {
            node: key.node().to_string(),
            relatedci: key.related_ci().map(str::to_string),
            metric: key.metric().to_string(),
            metric_label: metric_label(key),
            timestamps: series.iter().map(|p| zone.format(p.timestamp)).collect(),
            values: series.iter().map(|p| p.value).collect(),
            aligned_values,
            total_records: series.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChartPayload {
    pub success: bool,
    pub metric1_data: SeriesData,
    pub metric2_data: SeriesData,
    pub common_timestamps: Vec<String>,
}

impl ChartPayload {
    pub fn new(pair: PairSeries, zone: &CivilZone) -> Self {
        let aligned_a = pair.aligned_values(&pair.series_a);
        let aligned_b = pair.aligned_values(&pair.series_b);
        Self {
            success: true,
            metric1_data: SeriesData::new(&pair.key_a, &pair.series_a, aligned_a, zone),
            metric2_data: SeriesData::new(&pair.key_b, &pair.series_b, aligned_b, zone),
            common_timestamps: pair.common_timestamps.iter().map(|t| zone.format(*t)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DataRangePayload {
    pub success: bool,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_timestamp: Option<String>,
    pub max_timestamp: Option<String>,
    pub total_records: usize,
    pub unique_nodes: usize,
    pub unique_relatedcis: usize,
}

/// Date part only, as used by the dashboard's date pickers.
fn civil_date(zone: &CivilZone, ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.with_timezone(&zone.offset()).format("%Y-%m-%d").to_string()
}

impl DataRangePayload {
    pub fn new(range: &DataRange, zone: &CivilZone) -> Self {
        Self {
            success: true,
            start_date: range.first.map(|t| civil_date(zone, t)),
            end_date: range.last.map(|t| civil_date(zone, t)),
            min_timestamp: range.first.map(|t| zone.format(t)),
            max_timestamp: range.last.map(|t| zone.format(t)),
            total_records: range.total_records,
            unique_nodes: range.unique_nodes,
            unique_relatedcis: range.unique_related_cis,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OverallRange {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_timestamp: Option<String>,
    pub max_timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NodeRangeItem {
    pub start_date: String,
    pub end_date: String,
    pub total_records: usize,
}

impl NodeRangeItem {
    pub fn new(range: &NodeRange, zone: &CivilZone) -> Self {
        Self {
            start_date: zone.format(range.first),
            end_date: zone.format(range.last),
            total_records: range.total_records,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerDataRangePayload {
    pub success: bool,
    pub overall_range: OverallRange,
    pub node_ranges: BTreeMap<String, NodeRangeItem>,
    pub total_records: usize,
    pub unique_nodes: usize,
}

impl ServerDataRangePayload {
    pub fn new(range: &DataRange, nodes: &BTreeMap<String, NodeRange>, zone: &CivilZone) -> Self {
        Self {
            success: true,
            overall_range: OverallRange {
                start_date: range.first.map(|t| civil_date(zone, t)),
                end_date: range.last.map(|t| civil_date(zone, t)),
                min_timestamp: range.first.map(|t| zone.format(t)),
                max_timestamp: range.last.map(|t| zone.format(t)),
            },
            node_ranges: nodes
                .iter()
                .map(|(node, r)| (node.clone(), NodeRangeItem::new(r, zone)))
                .collect(),
            total_records: range.total_records,
            unique_nodes: range.unique_nodes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeTimeRangePayload {
    pub success: bool,
    pub node: String,
    #[serde(flatten)]
    pub range: NodeRangeItem,
}

#[derive(Debug, Serialize)]
pub struct DatasetTypeItem {
    pub value: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

impl From<DatasetKind> for DatasetTypeItem {
    fn from(kind: DatasetKind) -> Self {
        Self {
            value: kind.as_str(),
            label: kind.label(),
            description: kind.description(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub success: bool,
    pub dataset_type: DatasetKind,
    pub metrics: &'static [MetricInfo],
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DatasetInfo {
    pub total_records: usize,
    pub unique_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_relatedcis: Option<usize>,
    pub date_range: TimeRange,
}

impl DatasetInfo {
    pub fn new(kind: DatasetKind, range: &DataRange, zone: &CivilZone) -> Self {
        Self {
            total_records: range.total_records,
            unique_nodes: range.unique_nodes,
            unique_relatedcis: match kind {
                DatasetKind::Transaction => Some(range.unique_related_cis),
                DatasetKind::Server => None,
            },
            date_range: TimeRange {
                start: range.first.map(|t| zone.format(t)),
                end: range.last.map(|t| zone.format(t)),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CorrelationStatus {
    pub transaction_data_available: bool,
    pub server_data_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_data_info: Option<DatasetInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_data_info: Option<DatasetInfo>,
}

#[derive(Debug, Serialize)]
pub struct StatusPayload {
    pub success: bool,
    pub status: CorrelationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_failure_envelope() {
        let resp = ApiError::from(AnalysisError::invalid("window must be at least 1")).into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "invalid parameter: window must be at least 1");
    }

    #[test]
    fn test_analysis_payload_renders_civil_time_and_null_bounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).unwrap();
        let result = AnalysisResult {
            timestamps: vec![t0],
            values: vec![1.0],
            upper: vec![None],
            lower: vec![None],
            anomaly_timestamps: vec![],
            anomaly_values: vec![],
            total_records: 1,
            anomaly_count: 0,
            anomaly_rate: 0.0,
            min_value: 1.0,
            max_value: 1.0,
            avg_value: 1.0,
            min_absolute_threshold: 0.0,
        };
        let json = serde_json::to_value(AnalysisPayload::new(result, &CivilZone::default())).unwrap();
        assert_eq!(json["timestamps"][0], "2024-01-02 00:00:00");
        assert!(json["upper"][0].is_null());
        assert_eq!(json["success"], true);
    }

    #[test]
    fn test_correlation_item_omits_related_ci_for_server_keys() {
        let pair = CorrelationPair {
            key_a: SeriesKey::new(DatasetKind::Server, "a", None, "cpu_util_pct").unwrap(),
            key_b: SeriesKey::new(DatasetKind::Server, "b", None, "cpu_util_pct").unwrap(),
            coefficient: 0.91,
            sample_count: 10,
            common_timestamp_count: 10,
        };
        let json = serde_json::to_value(CorrelationItem::from(&pair)).unwrap();
        assert!(json.get("relatedci1").is_none());
        assert_eq!(json["node2"], "b");
        assert_eq!(json["correlation"], 0.91);
    }

    #[test]
    fn test_summary_payload_is_flat() {
        let json = serde_json::to_value(SummaryPayload {
            success: true,
            stats: SummaryStats::default(),
        })
        .unwrap();
        assert_eq!(json["total_correlations"], 0);
        assert_eq!(json["success"], true);
    }
}
