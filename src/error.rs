//! Domain error taxonomy shared by the loader, detector and correlation engine.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    /// Rejected before any computation was attempted.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("insufficient data: need at least {needed} points, have {have}")]
    InsufficientData { needed: usize, have: usize },

    /// The series store could not be queried.
    #[error("data source unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Wrap a storage-layer failure.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}
