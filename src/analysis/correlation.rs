use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::analysis::chart::{self, PairSeries};
use crate::analysis::stats::{pearson, SummaryStats};
use crate::error::AnalysisError;
use crate::series::{align, DatasetKind, SeriesKey, SeriesLoader, TimePoint, TimeWindow};

/// |r| at or above this is a strong correlation.
pub const STRONG_THRESHOLD: f64 = 0.8;
/// |r| at or above this (and below strong) is moderate.
pub const MODERATE_THRESHOLD: f64 = 0.6;

/// Strength bucket of a pair, decided by |r| alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Strong,
    Moderate,
    Weak,
}

impl Tier {
    pub fn classify(coefficient: f64) -> Self {
        let abs = coefficient.abs();
        if abs >= STRONG_THRESHOLD {
            Tier::Strong
        } else if abs >= MODERATE_THRESHOLD {
            Tier::Moderate
        } else {
            Tier::Weak
        }
    }
}

/// Pearson correlation between two distinct series.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationPair {
    /// Always orders before `key_b`.
    pub key_a: SeriesKey,
    pub key_b: SeriesKey,
    pub coefficient: f64,
    /// Finite value pairs that went into r.
    pub sample_count: usize,
    pub common_timestamp_count: usize,
}

impl CorrelationPair {
    pub fn tier(&self) -> Tier {
        Tier::classify(self.coefficient)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationReport {
    /// Descending by |r|, ties broken by key order.
    pub all_pairs: Vec<CorrelationPair>,
    pub strong: Vec<CorrelationPair>,
    pub moderate: Vec<CorrelationPair>,
    pub weak: Vec<CorrelationPair>,
    pub summary: SummaryStats,
    pub series_analyzed: usize,
    /// Distinct (node, related CI) or node subjects behind the series.
    pub subjects_analyzed: usize,
    pub metrics_analyzed: Vec<String>,
}

/// Resolve a configured worker count; `0` means one per available core.
pub fn worker_count(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn validate_min_correlation(min_correlation: f64) -> Result<(), AnalysisError> {
    if !min_correlation.is_finite() || !(0.0..=1.0).contains(&min_correlation) {
        return Err(AnalysisError::invalid(format!(
            "min_correlation must be within [0, 1], got {min_correlation}"
        )));
    }
    Ok(())
}

/// Correlate one pair. `None` when r is undefined (fewer than two common
/// timestamps, or a constant side).
fn correlate_pair(
    key_a: &SeriesKey,
    a: &[TimePoint],
    key_b: &SeriesKey,
    b: &[TimePoint],
) -> Option<CorrelationPair> {
    let (xs, ys) = align(a, b);
    let common = xs.len();
    if common < 2 {
        return None;
    }
    let (coefficient, sample_count) = pearson(&xs, &ys)?;
    Some(CorrelationPair {
        key_a: key_a.clone(),
        key_b: key_b.clone(),
        coefficient,
        sample_count,
        common_timestamp_count: common,
    })
}

/// Correlate every unordered pair of distinct series in `series`.
///
/// Pairs with undefined r are skipped; pairs with `|r| < min_correlation`
/// are dropped before tiering. Rows of the pair triangle are spread over
/// `workers` scoped threads and merged; `cancel` is polled between pairs.
pub fn correlate(
    series: &BTreeMap<SeriesKey, Vec<TimePoint>>,
    min_correlation: f64,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<CorrelationReport, AnalysisError> {
    validate_min_correlation(min_correlation)?;

    let entries: Vec<(&SeriesKey, &Vec<TimePoint>)> = series.iter().collect();
    let n = entries.len();
    let workers = workers.clamp(1, n.max(1));

    let partials: Vec<Result<Vec<CorrelationPair>, AnalysisError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let entries = &entries;
                scope.spawn(move || {
                    let mut found = Vec::new();
                    for i in (w..n).step_by(workers) {
                        let (key_a, a) = entries[i];
                        for &(key_b, b) in &entries[i + 1..] {
                            if cancel.is_cancelled() {
                                return Err(AnalysisError::Cancelled);
                            }
                            match correlate_pair(key_a, a, key_b, b) {
                                Some(pair) if pair.coefficient.abs() >= min_correlation => {
                                    found.push(pair)
                                }
                                Some(_) => {}
                                None => debug!(%key_a, %key_b, "correlation undefined, pair skipped"),
                            }
                        }
                    }
                    Ok(found)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(AnalysisError::upstream("correlation worker panicked")))
            })
            .collect()
    });

    let mut all_pairs = Vec::new();
    for partial in partials {
        all_pairs.extend(partial?);
    }
    all_pairs.sort_by(|x, y| {
        y.coefficient
            .abs()
            .total_cmp(&x.coefficient.abs())
            .then_with(|| x.key_a.cmp(&y.key_a))
            .then_with(|| x.key_b.cmp(&y.key_b))
    });

    let mut strong = Vec::new();
    let mut moderate = Vec::new();
    let mut weak = Vec::new();
    for pair in &all_pairs {
        match pair.tier() {
            Tier::Strong => strong.push(pair.clone()),
            Tier::Moderate => moderate.push(pair.clone()),
            Tier::Weak => weak.push(pair.clone()),
        }
    }

    let coefficients: Vec<f64> = all_pairs.iter().map(|p| p.coefficient).collect();
    let mut summary = SummaryStats::from_coefficients(&coefficients);
    summary.strong_correlation_count = strong.len();
    summary.moderate_correlation_count = moderate.len();
    summary.weak_correlation_count = weak.len();

    let metrics_analyzed: BTreeSet<String> = series.keys().map(|k| k.metric().to_string()).collect();
    let subjects: BTreeSet<(&str, Option<&str>)> = series.keys().map(|k| (k.node(), k.related_ci())).collect();

    Ok(CorrelationReport {
        all_pairs,
        strong,
        moderate,
        weak,
        summary,
        series_analyzed: n,
        subjects_analyzed: subjects.len(),
        metrics_analyzed: metrics_analyzed.into_iter().collect(),
    })
}

/// Loads a dataset and runs [`correlate`] over it.
#[derive(Clone)]
pub struct CorrelationEngine {
    loader: Arc<dyn SeriesLoader>,
    workers: usize,
}

impl CorrelationEngine {
    pub fn new(loader: Arc<dyn SeriesLoader>, workers: usize) -> Self {
        Self {
            loader,
            workers: worker_count(workers),
        }
    }

    pub fn run(
        &self,
        kind: DatasetKind,
        window: &TimeWindow,
        min_correlation: f64,
        cancel: &CancellationToken,
    ) -> Result<CorrelationReport, AnalysisError> {
        validate_min_correlation(min_correlation)?;
        let series = self.loader.load_all(kind, window)?;
        let report = correlate(&series, min_correlation, self.workers, cancel)?;

        info!(
            dataset = %kind,
            series = report.series_analyzed,
            pairs = report.all_pairs.len(),
            strong = report.strong.len(),
            min_correlation,
            "correlation analysis complete"
        );
        Ok(report)
    }

    pub async fn run_blocking(
        &self,
        kind: DatasetKind,
        window: TimeWindow,
        min_correlation: f64,
        cancel: CancellationToken,
    ) -> Result<CorrelationReport, AnalysisError> {
        let engine = self.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| engine.run(kind, &window, min_correlation, &cancel))
        })
        .await
        .map_err(|e| AnalysisError::upstream(format!("correlation task failed: {e}")))?
    }

    pub async fn pair_blocking(
        &self,
        key_a: SeriesKey,
        key_b: SeriesKey,
        window: TimeWindow,
    ) -> Result<PairSeries, AnalysisError> {
        let loader = Arc::clone(&self.loader);
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| chart::resolve_pair(loader.as_ref(), &key_a, &key_b, &window))
        })
        .await
        .map_err(|e| AnalysisError::upstream(format!("chart task failed: {e}")))?
    }
}
