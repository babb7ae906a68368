//! Side-by-side data for one correlation pair.

use chrono::{DateTime, Utc};

use crate::error::AnalysisError;
use crate::series::{common_timestamps, SeriesKey, SeriesLoader, TimePoint, TimeWindow};

/// Both raw series of a pair plus the timestamps they share.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSeries {
    pub key_a: SeriesKey,
    pub series_a: Vec<TimePoint>,
    pub key_b: SeriesKey,
    pub series_b: Vec<TimePoint>,
    pub common_timestamps: Vec<DateTime<Utc>>,
}

impl PairSeries {
    /// Values of `series` at each common timestamp, in order.
    pub fn aligned_values(&self, series: &[TimePoint]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.common_timestamps.len());
        let mut points = series.iter().peekable();
        for ts in &self.common_timestamps {
            while points.next_if(|p| p.timestamp < *ts).is_some() {}
            if let Some(p) = points.next_if(|p| p.timestamp == *ts) {
                out.push(p.value);
            }
        }
        out
    }
}

/// Fetch both series fresh and compute their common timestamps.
///
/// No detection is applied. A failure loading either side fails the call.
pub fn resolve_pair(
    loader: &dyn SeriesLoader,
    key_a: &SeriesKey,
    key_b: &SeriesKey,
    window: &TimeWindow,
) -> Result<PairSeries, AnalysisError> {
    if key_a == key_b {
        return Err(AnalysisError::invalid(format!(
            "correlation pair needs two distinct series, got '{key_a}' twice"
        )));
    }

    let series_a = loader.load(key_a, window)?;
    let series_b = loader.load(key_b, window)?;
    let common = common_timestamps(&series_a, &series_b);

    Ok(PairSeries {
        key_a: key_a.clone(),
        series_a,
        key_b: key_b.clone(),
        series_b,
        common_timestamps: common,
    })
}
