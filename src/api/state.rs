use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;

use crate::analysis::correlation::CorrelationEngine;
use crate::config::Config;
use crate::detect::engine::AnomalyEngine;
use crate::series::time::{CivilZone, Clock};
use crate::series::SeriesLoader;
use crate::storage::SqliteStore;

/// Request defaults taken from `[analysis]` and `[time]`.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub window: usize,
    pub k: f64,
    pub min_correlation: f64,
    pub combinations_window: usize,
    pub combinations_k: f64,
    pub lookback: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub anomaly: AnomalyEngine,
    pub correlation: CorrelationEngine,
    pub zone: CivilZone,
    pub clock: Arc<dyn Clock>,
    pub defaults: Defaults,
}

impl AppState {
    pub fn new(store: SqliteStore, config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let loader: Arc<dyn SeriesLoader> = Arc::new(store.clone());
        let analysis = &config.analysis;

        Ok(Self {
            anomaly: AnomalyEngine::new(Arc::clone(&loader), analysis.floor_policy()),
            correlation: CorrelationEngine::new(loader, analysis.correlation_workers),
            zone: config.time.zone()?,
            clock,
            defaults: Defaults {
                window: analysis.window,
                k: analysis.k,
                min_correlation: analysis.min_correlation,
                combinations_window: analysis.combinations_window,
                combinations_k: analysis.combinations_k,
                lookback: config.time.lookback(),
            },
            store,
        })
    }
}
