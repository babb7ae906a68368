//! Minimum absolute threshold applied after statistical detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::AnalysisResult;

/// What a configured floor does to already-flagged anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorMode {
    /// Surface the threshold as a reference line; keep every flag.
    #[default]
    Annotate,
    /// Drop flags whose magnitude is below the threshold.
    Suppress,
}

/// Floor mode plus per-metric thresholds, as configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloorPolicy {
    pub mode: FloorMode,
    pub thresholds: BTreeMap<String, f64>,
}

impl FloorPolicy {
    pub fn threshold_for(&self, metric: &str) -> Option<f64> {
        self.thresholds.get(metric).copied()
    }

    pub fn apply(&self, result: AnalysisResult, metric: &str) -> AnalysisResult {
        apply_floor(result, self.threshold_for(metric), self.mode)
    }
}

/// Apply `threshold` to a detection result.
///
/// A missing or non-positive threshold disables the floor and leaves the
/// result untouched apart from reporting `0.0`.
pub fn apply_floor(mut result: AnalysisResult, threshold: Option<f64>, mode: FloorMode) -> AnalysisResult {
    let threshold = match threshold {
        Some(t) if t.is_finite() && t > 0.0 => t,
        _ => {
            result.min_absolute_threshold = 0.0;
            return result;
        }
    };

    result.min_absolute_threshold = threshold;
    if mode == FloorMode::Annotate {
        return result;
    }

    let (timestamps, values): (Vec<_>, Vec<_>) = result
        .anomaly_timestamps
        .iter()
        .zip(result.anomaly_values.iter())
        .filter(|(_, v)| v.abs() >= threshold)
        .map(|(t, v)| (*t, *v))
        .unzip();

    result.anomaly_timestamps = timestamps;
    result.anomaly_values = values;
    result.recount();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnalysisResult;
    use chrono::{Duration, TimeZone, Utc};

    fn sample() -> AnalysisResult {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..4).map(|i| t0 + Duration::minutes(i)).collect();
        let mut r = AnalysisResult {
            timestamps: timestamps.clone(),
            values: vec![1.0, 2.0, 50.0, 3.0],
            upper: vec![None, Some(2.5), Some(2.5), Some(2.5)],
            lower: vec![None, Some(0.5), Some(0.5), Some(0.5)],
            anomaly_timestamps: vec![timestamps[2], timestamps[3]],
            anomaly_values: vec![50.0, 3.0],
            total_records: 4,
            anomaly_count: 0,
            anomaly_rate: 0.0,
            min_value: 1.0,
            max_value: 50.0,
            avg_value: 14.0,
            min_absolute_threshold: 0.0,
        };
        r.recount();
        r
    }

    #[test]
    fn test_disabled_floor_is_pass_through() {
        let original = sample();
        for t in [None, Some(0.0), Some(-4.0), Some(f64::NAN)] {
            let out = apply_floor(original.clone(), t, FloorMode::Suppress);
            assert_eq!(out, original);
        }
    }

    #[test]
    fn test_annotate_keeps_flags_below_threshold() {
        // Advisory unless suppression is opted into.
        let out = apply_floor(sample(), Some(10.0), FloorMode::Annotate);
        assert_eq!(out.min_absolute_threshold, 10.0);
        assert_eq!(out.anomaly_count, 2);
        assert_eq!(out.anomaly_values, vec![50.0, 3.0]);
    }

    #[test]
    fn test_policy_looks_up_metric() {
        let policy = FloorPolicy {
            mode: FloorMode::Suppress,
            thresholds: BTreeMap::from([("calls_per_min".to_string(), 10.0)]),
        };
        assert_eq!(policy.apply(sample(), "calls_per_min").anomaly_count, 1);
        assert_eq!(policy.apply(sample(), "avg_response_time").anomaly_count, 2);
    }

    #[test]
    fn test_suppress_drops_small_flags_and_recounts() {
        let out = apply_floor(sample(), Some(10.0), FloorMode::Suppress);
        assert_eq!(out.anomaly_values, vec![50.0]);
        assert_eq!(out.anomaly_count, 1);
        assert_eq!(out.anomaly_rate, 1.0 / 4.0);
        assert_eq!(out.anomaly_timestamps.len(), 1);
    }
}
