//! Descriptive statistics over correlation coefficients.

use serde::Serialize;

/// Pearson's r between two equal-length vectors.
///
/// Returns `None` when fewer than two finite pairs remain or either side has
/// zero variance (r is undefined). The result is clamped to `[-1, 1]`.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<(f64, usize)> {
    if x.len() != y.len() {
        return None;
    }

    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect();
    let n = pairs.len();
    if n < 2 {
        return None;
    }
    // A constant side has no variance; rounding in the mean must not fake one.
    let (x0, y0) = pairs[0];
    if pairs.iter().all(|p| p.0 == x0) || pairs.iter().all(|p| p.1 == y0) {
        return None;
    }

    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in &pairs {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        return None;
    }
    Some(((cov / denom).clamp(-1.0, 1.0), n))
}

/// Median of an already-sorted slice.
fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Summary of the signed coefficients of a correlation report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_correlations: usize,
    pub average_correlation: f64,
    pub median_correlation: f64,
    pub max_correlation: f64,
    pub min_correlation: f64,
    /// Population standard deviation.
    pub std_correlation: f64,
    pub strong_correlation_count: usize,
    pub moderate_correlation_count: usize,
    pub weak_correlation_count: usize,
}

impl SummaryStats {
    /// Compute the distribution fields from `coefficients`; tier counts are
    /// filled in by the caller.
    pub fn from_coefficients(coefficients: &[f64]) -> Self {
        if coefficients.is_empty() {
            return Self::default();
        }

        let n = coefficients.len() as f64;
        let mean = coefficients.iter().sum::<f64>() / n;
        let variance = coefficients.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = coefficients.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Self {
            total_correlations: coefficients.len(),
            average_correlation: mean,
            median_correlation: median_sorted(&sorted),
            max_correlation: sorted[sorted.len() - 1],
            min_correlation: sorted[0],
            std_correlation: variance.sqrt(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_linear() {
        let x: Vec<f64> = (0..100).map(|i| i as f64 * 0.37).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 5.0).collect();
        let (r, n) = pearson(&x, &y).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(n, 100);

        let neg: Vec<f64> = x.iter().map(|v| -v).collect();
        let (r, _) = pearson(&x, &neg).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_undefined_cases() {
        assert!(pearson(&[1.0], &[2.0]).is_none());
        assert!(pearson(&[1.0, 2.0], &[3.0]).is_none());
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_pearson_constant_non_dyadic_side_is_undefined() {
        let noise: Vec<f64> = (0..100).map(|i| ((i * 37 + 11) % 17) as f64).collect();
        for value in [70.3, 0.1, 33.33] {
            let flat = vec![value; 100];
            assert!(pearson(&flat, &noise).is_none(), "value {value}");
            assert!(pearson(&noise, &flat).is_none(), "value {value}");
        }
    }

    #[test]
    fn test_pearson_skips_non_finite_pairs() {
        let x = [1.0, 2.0, f64::NAN, 3.0];
        let y = [2.0, 4.0, 5.0, 6.0];
        let (r, n) = pearson(&x, &y).unwrap();
        assert_eq!(n, 3);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_stats() {
        let s = SummaryStats::from_coefficients(&[0.9, -0.7, 0.8, 0.6]);
        assert_eq!(s.total_correlations, 4);
        assert!((s.average_correlation - 0.4).abs() < 1e-12);
        assert!((s.median_correlation - 0.7).abs() < 1e-12);
        assert_eq!(s.max_correlation, 0.9);
        assert_eq!(s.min_correlation, -0.7);
        // population variance of the four values
        let expected = ((0.25 + 1.21 + 0.16 + 0.04) / 4.0_f64).sqrt();
        assert!((s.std_correlation - expected).abs() < 1e-12);
    }

    #[test]
    fn test_summary_of_nothing_is_zero() {
        assert_eq!(SummaryStats::from_coefficients(&[]), SummaryStats::default());
    }
}
