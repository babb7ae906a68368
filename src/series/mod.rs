//! Series identity, samples, time windows and the loader seam.

pub mod time;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use self::time::{CivilZone, Clock};

/// A single sample of a monitored metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimePoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Which family of metrics a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Transaction,
    Server,
}

/// Catalog entry for a metric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricInfo {
    pub value: &'static str,
    pub label: &'static str,
}

const TRANSACTION_METRICS: &[MetricInfo] = &[
    MetricInfo { value: "calls_per_min", label: "Calls Per Minute" },
    MetricInfo { value: "avg_response_time", label: "Average Response Time" },
];

const SERVER_METRICS: &[MetricInfo] = &[
    MetricInfo { value: "cpu_util_pct", label: "CPU Utilization %" },
    MetricInfo { value: "mem_util_pct", label: "Memory Utilization %" },
    MetricInfo { value: "net_packet_count_per_s", label: "Network Packets/sec" },
];

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Transaction, DatasetKind::Server];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Transaction => "transaction",
            DatasetKind::Server => "server",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DatasetKind::Transaction => "Transaction Data",
            DatasetKind::Server => "Server Data",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DatasetKind::Transaction => {
                "Application transaction metrics (calls per min, response time)"
            }
            DatasetKind::Server => "Server performance metrics (CPU, memory, network)",
        }
    }

    pub fn metrics(&self) -> &'static [MetricInfo] {
        match self {
            DatasetKind::Transaction => TRANSACTION_METRICS,
            DatasetKind::Server => SERVER_METRICS,
        }
    }

    /// Look up a metric by its wire name, returning the catalog's static name.
    pub fn metric(&self, name: &str) -> Result<&'static MetricInfo, AnalysisError> {
        self.metrics()
            .iter()
            .find(|m| m.value == name)
            .ok_or_else(|| {
                AnalysisError::invalid(format!(
                    "unknown {} metric '{}'",
                    self.as_str(),
                    name
                ))
            })
    }

    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "transaction" => Ok(DatasetKind::Transaction),
            "server" => Ok(DatasetKind::Server),
            other => Err(AnalysisError::invalid(format!("unknown dataset type '{other}'"))),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one series. Equality and ordering are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "dataset", rename_all = "snake_case")]
pub enum SeriesKey {
    Transaction {
        node: String,
        related_ci: String,
        metric: String,
    },
    Server {
        node: String,
        metric: String,
    },
}

impl SeriesKey {
    /// Build a key, validating the metric against the dataset's catalog.
    pub fn new(
        kind: DatasetKind,
        node: &str,
        related_ci: Option<&str>,
        metric: &str,
    ) -> Result<Self, AnalysisError> {
        let node = node.trim();
        if node.is_empty() {
            return Err(AnalysisError::invalid("node must not be empty"));
        }
        let metric = kind.metric(metric.trim())?.value.to_string();

        match kind {
            DatasetKind::Transaction => {
                let related_ci = related_ci.map(str::trim).unwrap_or_default();
                if related_ci.is_empty() {
                    return Err(AnalysisError::invalid(
                        "related CI is required for transaction series",
                    ));
                }
                Ok(SeriesKey::Transaction {
                    node: node.to_string(),
                    related_ci: related_ci.to_string(),
                    metric,
                })
            }
            DatasetKind::Server => Ok(SeriesKey::Server {
                node: node.to_string(),
                metric,
            }),
        }
    }

    pub fn kind(&self) -> DatasetKind {
        match self {
            SeriesKey::Transaction { .. } => DatasetKind::Transaction,
            SeriesKey::Server { .. } => DatasetKind::Server,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            SeriesKey::Transaction { node, .. } | SeriesKey::Server { node, .. } => node,
        }
    }

    pub fn related_ci(&self) -> Option<&str> {
        match self {
            SeriesKey::Transaction { related_ci, .. } => Some(related_ci),
            SeriesKey::Server { .. } => None,
        }
    }

    pub fn metric(&self) -> &str {
        match self {
            SeriesKey::Transaction { metric, .. } | SeriesKey::Server { metric, .. } => metric,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKey::Transaction { node, related_ci, metric } => {
                write!(f, "{node}/{related_ci}/{metric}")
            }
            SeriesKey::Server { node, metric } => write!(f, "{node}/{metric}"),
        }
    }
}

/// A closed interval `[start, end]` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AnalysisError> {
        if start >= end {
            return Err(AnalysisError::invalid(format!(
                "start time {} must be before end time {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds as civil time in `zone`.
    pub fn parse(zone: &CivilZone, start: &str, end: &str) -> Result<Self, AnalysisError> {
        Self::new(zone.parse(start)?, zone.parse(end)?)
    }

    /// Fill in missing bounds: `end` defaults to now, `start` to `lookback`
    /// before `end`.
    pub fn resolve(
        zone: &CivilZone,
        clock: &dyn Clock,
        start: Option<&str>,
        end: Option<&str>,
        lookback: Duration,
    ) -> Result<Self, AnalysisError> {
        let end = match end.filter(|s| !s.trim().is_empty()) {
            Some(raw) => zone.parse(raw)?,
            None => clock.now(),
        };
        let start = match start.filter(|s| !s.trim().is_empty()) {
            Some(raw) => zone.parse(raw)?,
            None => end - lookback,
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Timestamps present in both series. Inputs must be sorted ascending.
pub fn common_timestamps(a: &[TimePoint], b: &[TimePoint]) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].timestamp.cmp(&b[j].timestamp) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i].timestamp);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Value pairs at the common timestamps of two sorted series.
pub fn align(a: &[TimePoint], b: &[TimePoint]) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].timestamp.cmp(&b[j].timestamp) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                xs.push(a[i].value);
                ys.push(b[j].value);
                i += 1;
                j += 1;
            }
        }
    }
    (xs, ys)
}

/// Resolves series keys to ordered samples.
///
/// Implementations must return points sorted strictly ascending by timestamp.
pub trait SeriesLoader: Send + Sync {
    fn load(&self, key: &SeriesKey, window: &TimeWindow) -> Result<Vec<TimePoint>, AnalysisError>;

    /// Every series of `kind` with at least one sample inside `window`.
    fn keys(&self, kind: DatasetKind, window: &TimeWindow) -> Result<Vec<SeriesKey>, AnalysisError>;

    fn load_all(
        &self,
        kind: DatasetKind,
        window: &TimeWindow,
    ) -> Result<BTreeMap<SeriesKey, Vec<TimePoint>>, AnalysisError> {
        let mut out = BTreeMap::new();
        for key in self.keys(kind, window)? {
            let points = self.load(&key, window)?;
            out.insert(key, points);
        }
        Ok(out)
    }
}

/// In-memory loader, mainly for tests and CLI fixtures.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    series: BTreeMap<SeriesKey, Vec<TimePoint>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a series; points are sorted and de-duplicated by timestamp
    /// (last write wins).
    pub fn insert(&mut self, key: SeriesKey, mut points: Vec<TimePoint>) {
        points.sort_by_key(|p| p.timestamp);
        let mut deduped: Vec<TimePoint> = Vec::with_capacity(points.len());
        for p in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == p.timestamp => *last = p,
                _ => deduped.push(p),
            }
        }
        self.series.insert(key, deduped);
    }
}

impl SeriesLoader for MemoryLoader {
    fn load(&self, key: &SeriesKey, window: &TimeWindow) -> Result<Vec<TimePoint>, AnalysisError> {
        let points = self
            .series
            .get(key)
            .ok_or_else(|| AnalysisError::invalid(format!("unknown series '{key}'")))?;
        Ok(points
            .iter()
            .filter(|p| window.contains(p.timestamp))
            .copied()
            .collect())
    }

    fn keys(&self, kind: DatasetKind, window: &TimeWindow) -> Result<Vec<SeriesKey>, AnalysisError> {
        Ok(self
            .series
            .iter()
            .filter(|(k, points)| {
                k.kind() == kind && points.iter().any(|p| window.contains(p.timestamp))
            })
            .map(|(k, _)| k.clone())
            .collect())
    }
}
