//! Cross-series analysis: pairwise correlation and pair chart data.

pub mod chart;
pub mod correlation;
pub mod stats;
