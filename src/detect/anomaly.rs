use crate::error::AnalysisError;

/// A borrowed run of samples for window statistics.
pub struct TimeSeries<'a> {
    values: &'a [f64],
}

impl<'a> TimeSeries<'a> {
    pub fn new(values: &'a [f64]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every sample is equal (or there are none).
    pub fn is_constant(&self) -> bool {
        match self.values.split_first() {
            Some((first, rest)) => rest.iter().all(|v| v == first),
            None => true,
        }
    }

    /// Arithmetic mean. A constant run yields its value exactly, not `sum / n`.
    pub fn mean(&self) -> f64 {
        match self.values.first() {
            None => return 0.0,
            Some(&v) if self.is_constant() => return v,
            Some(_) => {}
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance; exactly zero for a constant run.
    pub fn variance(&self) -> f64 {
        if self.is_constant() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Per-index output of the rolling detector.
///
/// `centerline`, `upper` and `lower` are `None` during warm-up: the first
/// `window` indices have no complete trailing window and are never flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub centerline: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub anomalous: Vec<bool>,
}

impl Bands {
    pub fn anomaly_count(&self) -> usize {
        self.anomalous.iter().filter(|&&a| a).count()
    }
}

/// Validate detector parameters before touching any data.
pub fn validate_params(window: usize, k: f64) -> Result<(), AnalysisError> {
    if window == 0 {
        return Err(AnalysisError::invalid("window must be a positive sample count"));
    }
    if !k.is_finite() || k <= 0.0 {
        return Err(AnalysisError::invalid(format!(
            "k must be a positive finite number, got {k}"
        )));
    }
    Ok(())
}

/// Rolling mean ± k·σ detection.
///
/// For index `i` the baseline is the `window` samples strictly before `i`
/// (`values[i - window..i]`); the point under test never contributes to its
/// own bounds. A point is anomalous iff it lies strictly outside
/// `[mean - k·σ, mean + k·σ]`, σ being the population standard deviation.
pub fn detect(values: &[f64], window: usize, k: f64) -> Result<Bands, AnalysisError> {
    validate_params(window, k)?;

    let n = values.len();
    let mut bands = Bands {
        centerline: vec![None; n],
        upper: vec![None; n],
        lower: vec![None; n],
        anomalous: vec![false; n],
    };

    for i in window..n {
        let baseline = TimeSeries::new(&values[i - window..i]);
        let mean = baseline.mean();
        let spread = k * baseline.std_dev();
        let upper = mean + spread;
        let lower = mean - spread;

        bands.centerline[i] = Some(mean);
        bands.upper[i] = Some(upper);
        bands.lower[i] = Some(lower);
        bands.anomalous[i] = values[i] > upper || values[i] < lower;
    }

    Ok(bands)
}
