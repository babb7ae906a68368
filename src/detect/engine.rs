use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::detect::anomaly::{self, TimeSeries};
use crate::detect::floor::FloorPolicy;
use crate::detect::{AnalysisRequest, AnalysisResult};
use crate::error::AnalysisError;
use crate::series::{DatasetKind, SeriesKey, SeriesLoader, TimePoint, TimeWindow};

/// Minimum number of samples a series needs before it can be analysed.
pub const MIN_POINTS: usize = 2;

/// Runs single-series detection against a loader.
#[derive(Clone)]
pub struct AnomalyEngine {
    loader: Arc<dyn SeriesLoader>,
    floor: FloorPolicy,
}

impl AnomalyEngine {
    pub fn new(loader: Arc<dyn SeriesLoader>, floor: FloorPolicy) -> Self {
        Self { loader, floor }
    }

    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        run_analysis(self.loader.as_ref(), request, &self.floor)
    }

    /// Same as [`analyze`](Self::analyze) on the blocking pool.
    pub async fn analyze_blocking(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let engine = self.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| engine.analyze(&request)))
            .await
            .map_err(|e| AnalysisError::upstream(format!("analysis task failed: {e}")))?
    }

    /// Run detection over every series of `kind` in `window` and report the
    /// ones with at least one anomaly.
    pub fn scan(
        &self,
        kind: DatasetKind,
        window: &TimeWindow,
        window_size: usize,
        k: f64,
        cancel: &CancellationToken,
    ) -> Result<CombinationsReport, AnalysisError> {
        anomaly::validate_params(window_size, k)?;

        let series = self.loader.load_all(kind, window)?;
        let mut report = CombinationsReport {
            combinations: Vec::new(),
            total_records: 0,
            total_anomalies: 0,
            anomaly_rate: 0.0,
            unique_nodes: 0,
            unique_related_cis: 0,
            first_timestamp: None,
            last_timestamp: None,
            window_size,
            k,
        };
        let mut nodes = BTreeSet::new();
        let mut related_cis = BTreeSet::new();

        for (key, points) in &series {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            nodes.insert(key.node().to_string());
            if let Some(ci) = key.related_ci() {
                related_cis.insert(ci.to_string());
            }
            report.total_records += points.len();
            if let (Some(first), Some(last)) = (points.first(), points.last()) {
                report.first_timestamp = Some(report.first_timestamp.map_or(first.timestamp, |t| t.min(first.timestamp)));
                report.last_timestamp = Some(report.last_timestamp.map_or(last.timestamp, |t| t.max(last.timestamp)));
            }
            if points.len() < MIN_POINTS {
                debug!(%key, points = points.len(), "skipping short series");
                continue;
            }

            let result = detect_points(points, window_size, k)?;
            let result = self.floor.apply(result, key.metric());
            report.total_anomalies += result.anomaly_count;
            if result.anomaly_count == 0 {
                continue;
            }

            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let stats = TimeSeries::new(&values);
            report.combinations.push(AnomalousCombination {
                key: key.clone(),
                anomaly_count: result.anomaly_count,
                mean_value: stats.mean(),
                std_value: stats.std_dev(),
                min_value: stats.min(),
                max_value: stats.max(),
                first_anomaly: result.anomaly_timestamps.first().copied(),
                last_anomaly: result.anomaly_timestamps.last().copied(),
            });
        }

        report
            .combinations
            .sort_by(|a, b| b.anomaly_count.cmp(&a.anomaly_count).then_with(|| a.key.cmp(&b.key)));
        report.unique_nodes = nodes.len();
        report.unique_related_cis = related_cis.len();
        if report.total_records > 0 {
            report.anomaly_rate = report.total_anomalies as f64 / report.total_records as f64;
        }

        info!(
            dataset = %kind,
            series = series.len(),
            flagged = report.combinations.len(),
            anomalies = report.total_anomalies,
            "anomalous combination scan complete"
        );
        Ok(report)
    }

    pub async fn scan_blocking(
        &self,
        kind: DatasetKind,
        window: TimeWindow,
        window_size: usize,
        k: f64,
        cancel: CancellationToken,
    ) -> Result<CombinationsReport, AnalysisError> {
        let engine = self.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| engine.scan(kind, &window, window_size, k, &cancel))
        })
        .await
        .map_err(|e| AnalysisError::upstream(format!("scan task failed: {e}")))?
    }
}

/// A series that produced at least one anomaly in a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalousCombination {
    pub key: SeriesKey,
    pub anomaly_count: usize,
    pub mean_value: f64,
    pub std_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub first_anomaly: Option<DateTime<Utc>>,
    pub last_anomaly: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinationsReport {
    /// Sorted by anomaly count, most anomalous first.
    pub combinations: Vec<AnomalousCombination>,
    pub total_records: usize,
    pub total_anomalies: usize,
    pub anomaly_rate: f64,
    pub unique_nodes: usize,
    pub unique_related_cis: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub window_size: usize,
    pub k: f64,
}

/// load -> detect -> floor -> summarise.
pub fn run_analysis(
    loader: &dyn SeriesLoader,
    request: &AnalysisRequest,
    floor: &FloorPolicy,
) -> Result<AnalysisResult, AnalysisError> {
    request.validate()?;

    let points = loader.load(&request.key, &request.window)?;
    if points.len() < MIN_POINTS {
        return Err(AnalysisError::InsufficientData {
            needed: MIN_POINTS,
            have: points.len(),
        });
    }

    let result = detect_points(&points, request.window_size, request.k)?;
    let result = floor.apply(result, request.key.metric());

    info!(
        key = %request.key,
        records = result.total_records,
        anomalies = result.anomaly_count,
        window = request.window_size,
        k = request.k,
        "analysis complete"
    );
    Ok(result)
}

/// Detection plus summary statistics, without any floor applied.
pub fn detect_points(points: &[TimePoint], window_size: usize, k: f64) -> Result<AnalysisResult, AnalysisError> {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let bands = anomaly::detect(&values, window_size, k)?;

    let (anomaly_timestamps, anomaly_values): (Vec<_>, Vec<_>) = points
        .iter()
        .zip(bands.anomalous.iter())
        .filter(|(_, flagged)| **flagged)
        .map(|(p, _)| (p.timestamp, p.value))
        .unzip();

    let stats = TimeSeries::new(&values);
    let mut result = AnalysisResult {
        timestamps: points.iter().map(|p| p.timestamp).collect(),
        total_records: values.len(),
        min_value: if stats.is_empty() { 0.0 } else { stats.min() },
        max_value: if stats.is_empty() { 0.0 } else { stats.max() },
        avg_value: stats.mean(),
        values,
        upper: bands.upper,
        lower: bands.lower,
        anomaly_timestamps,
        anomaly_values,
        anomaly_count: 0,
        anomaly_rate: 0.0,
        min_absolute_threshold: 0.0,
    };
    result.recount();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::floor::FloorMode;
    use crate::series::MemoryLoader;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn key(node: &str, ci: &str) -> SeriesKey {
        SeriesKey::new(DatasetKind::Transaction, node, Some(ci), "calls_per_min").unwrap()
    }

    fn spiky(n: i64, spike_at: Option<i64>) -> Vec<TimePoint> {
        (0..n)
            .map(|i| {
                let v = if Some(i) == spike_at { 10_000.0 } else { 100.0 + (i % 3) as f64 };
                TimePoint::new(t(i), v)
            })
            .collect()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(t(0), t(1_000)).unwrap()
    }

    #[test]
    fn test_run_analysis_summary() {
        let mut loader = MemoryLoader::new();
        loader.insert(key("app", "checkout"), spiky(100, Some(50)));

        let request = AnalysisRequest {
            key: key("app", "checkout"),
            window: window(),
            window_size: 20,
            k: 3.0,
        };
        let result = run_analysis(&loader, &request, &FloorPolicy::default()).unwrap();

        assert_eq!(result.total_records, 100);
        assert_eq!(result.anomaly_count, 1);
        assert_eq!(result.anomaly_timestamps, vec![t(50)]);
        assert_eq!(result.anomaly_values, vec![10_000.0]);
        assert_eq!(result.anomaly_rate, 1.0 / 100.0);
        assert_eq!(result.max_value, 10_000.0);
        assert_eq!(result.min_value, 100.0);
        assert_eq!(result.upper.len(), 100);
        assert_eq!(result.lower.len(), 100);
        assert_eq!(result.min_absolute_threshold, 0.0);
    }

    #[test]
    fn test_anomaly_rate_identity() {
        let mut loader = MemoryLoader::new();
        let mut points = spiky(60, Some(30));
        points[45].value = -500.0;
        loader.insert(key("a", "b"), points);

        let request = AnalysisRequest { key: key("a", "b"), window: window(), window_size: 10, k: 2.0 };
        let r = run_analysis(&loader, &request, &FloorPolicy::default()).unwrap();
        assert_eq!(r.anomaly_rate, r.anomaly_count as f64 / r.total_records as f64);
        assert_eq!(r.anomaly_count, r.anomaly_timestamps.len());
    }

    #[test]
    fn test_single_point_is_insufficient() {
        let mut loader = MemoryLoader::new();
        loader.insert(key("a", "b"), vec![TimePoint::new(t(0), 1.0)]);
        let request = AnalysisRequest { key: key("a", "b"), window: window(), window_size: 5, k: 3.0 };
        assert_eq!(
            run_analysis(&loader, &request, &FloorPolicy::default()),
            Err(AnalysisError::InsufficientData { needed: 2, have: 1 })
        );
    }

    #[test]
    fn test_parameters_checked_before_loading() {
        // Unknown key would be InvalidParameter too, so use a known one.
        let mut loader = MemoryLoader::new();
        loader.insert(key("a", "b"), spiky(10, None));
        let request = AnalysisRequest { key: key("a", "b"), window: window(), window_size: 0, k: 3.0 };
        let err = run_analysis(&loader, &request, &FloorPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn test_floor_threshold_is_reported() {
        let mut loader = MemoryLoader::new();
        loader.insert(key("a", "b"), spiky(40, Some(30)));
        let floor = FloorPolicy {
            mode: FloorMode::Annotate,
            thresholds: BTreeMap::from([("calls_per_min".to_string(), 50.0)]),
        };
        let request = AnalysisRequest { key: key("a", "b"), window: window(), window_size: 10, k: 3.0 };
        let r = run_analysis(&loader, &request, &floor).unwrap();
        assert_eq!(r.min_absolute_threshold, 50.0);
        assert_eq!(r.anomaly_count, 1);
    }

    #[test]
    fn test_scan_reports_only_anomalous_series() {
        let mut loader = MemoryLoader::new();
        loader.insert(key("n1", "quiet"), spiky(60, None));
        loader.insert(key("n1", "loud"), spiky(60, Some(40)));
        loader.insert(key("n2", "short"), vec![TimePoint::new(t(0), 1.0)]);
        let engine = AnomalyEngine::new(Arc::new(loader), FloorPolicy::default());

        let report = engine
            .scan(DatasetKind::Transaction, &window(), 10, 3.0, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.combinations.len(), 1);
        let c = &report.combinations[0];
        assert_eq!(c.key, key("n1", "loud"));
        assert_eq!(c.anomaly_count, 1);
        assert_eq!(c.first_anomaly, Some(t(40)));
        assert_eq!(c.last_anomaly, Some(t(40)));
        assert_eq!(c.max_value, 10_000.0);
        assert_eq!(report.total_records, 121);
        assert_eq!(report.unique_nodes, 2);
        assert_eq!(report.unique_related_cis, 3);
        assert_eq!(report.first_timestamp, Some(t(0)));
        assert_eq!(report.last_timestamp, Some(t(59)));
    }

    #[test]
    fn test_scan_honours_cancellation() {
        let mut loader = MemoryLoader::new();
        loader.insert(key("n1", "x"), spiky(30, None));
        let engine = AnomalyEngine::new(Arc::new(loader), FloorPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            engine.scan(DatasetKind::Transaction, &window(), 10, 3.0, &cancel),
            Err(AnalysisError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_analyze_blocking_matches_sync() {
        let mut loader = MemoryLoader::new();
        loader.insert(key("a", "b"), spiky(50, Some(25)));
        let engine = AnomalyEngine::new(Arc::new(loader), FloorPolicy::default());
        let request = AnalysisRequest { key: key("a", "b"), window: window(), window_size: 10, k: 3.0 };

        let sync = engine.analyze(&request).unwrap();
        let blocking = engine.analyze_blocking(request).await.unwrap();
        assert_eq!(sync, blocking);
    }
}
