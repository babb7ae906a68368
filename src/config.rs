//! TOML configuration for trendscope.
//!
//! Layered model: compiled-in defaults, overridden by a TOML file found via
//! the `TRENDSCOPE_CONFIG` environment variable or the standard system path.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::floor::{FloorMode, FloorPolicy};
use crate::series::time::CivilZone;

pub const CONFIG_ENV: &str = "TRENDSCOPE_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/trendscope/trendscope.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: `$TRENDSCOPE_CONFIG`, the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TRENDSCOPE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.time.zone()?;
        if self.time.default_lookback_hours == 0 {
            bail!("time.default_lookback_hours must be at least 1");
        }

        let a = &self.analysis;
        if a.window == 0 || a.combinations_window == 0 {
            bail!("analysis windows must be at least 1 sample");
        }
        if !(a.k.is_finite() && a.k > 0.0) || !(a.combinations_k.is_finite() && a.combinations_k > 0.0) {
            bail!("analysis k values must be positive and finite");
        }
        if !(0.0..=1.0).contains(&a.min_correlation) {
            bail!("analysis.min_correlation must be within [0, 1]");
        }
        for (metric, threshold) in &a.min_absolute_thresholds {
            if !threshold.is_finite() || *threshold < 0.0 {
                bail!("min_absolute_thresholds.{metric} must be a non-negative number");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; created on first open.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/trendscope.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Fixed offset used to read and render zone-less timestamps.
    pub utc_offset: String,
    /// Range used when a request omits its start time.
    pub default_lookback_hours: u32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            utc_offset: "+03:00".to_string(),
            default_lookback_hours: 24,
        }
    }
}

impl TimeConfig {
    pub fn zone(&self) -> Result<CivilZone> {
        CivilZone::parse_offset(&self.utc_offset)
            .with_context(|| format!("time.utc_offset '{}' is not a valid offset", self.utc_offset))
    }

    pub fn lookback(&self) -> Duration {
        Duration::hours(i64::from(self.default_lookback_hours))
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Default rolling window (samples) for single-series analysis.
    pub window: usize,
    /// Default band half-width in standard deviations.
    pub k: f64,
    pub min_correlation: f64,
    /// Defaults for the anomalous-combinations scan.
    pub combinations_window: usize,
    pub combinations_k: f64,
    /// Correlation worker threads; 0 uses available parallelism.
    pub correlation_workers: usize,
    pub floor_mode: FloorMode,
    /// Per-metric absolute floor, e.g. `avg_response_time = 50.0`.
    pub min_absolute_thresholds: BTreeMap<String, f64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window: 120,
            k: 3.0,
            min_correlation: 0.6,
            combinations_window: 576,
            combinations_k: 15.0,
            correlation_workers: 0,
            floor_mode: FloorMode::Annotate,
            min_absolute_thresholds: BTreeMap::new(),
        }
    }
}

impl AnalysisConfig {
    pub fn floor_policy(&self) -> FloorPolicy {
        FloorPolicy {
            mode: self.floor_mode,
            thresholds: self.min_absolute_thresholds.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of the human formatter.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.storage.db_path, "data/trendscope.db");
        assert_eq!(cfg.time.utc_offset, "+03:00");
        assert_eq!(cfg.time.lookback(), Duration::hours(24));
        assert_eq!(cfg.analysis.window, 120);
        assert_eq!(cfg.analysis.k, 3.0);
        assert_eq!(cfg.analysis.min_correlation, 0.6);
        assert_eq!(cfg.analysis.combinations_window, 576);
        assert_eq!(cfg.analysis.combinations_k, 15.0);
        assert_eq!(cfg.analysis.floor_mode, FloorMode::Annotate);
        assert!(cfg.analysis.min_absolute_thresholds.is_empty());
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"

[storage]
db_path = "/var/lib/trendscope/metrics.db"

[time]
utc_offset = "+00:00"
default_lookback_hours = 6

[analysis]
window = 60
k = 2.5
min_correlation = 0.7
correlation_workers = 4
floor_mode = "suppress"

[analysis.min_absolute_thresholds]
avg_response_time = 50.0
cpu_util_pct = 5.0

[logging]
level = "debug"
json = true
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.storage.db_path, "/var/lib/trendscope/metrics.db");
        assert_eq!(cfg.time.zone().unwrap(), CivilZone::utc());
        assert_eq!(cfg.time.default_lookback_hours, 6);
        assert_eq!(cfg.analysis.window, 60);
        assert_eq!(cfg.analysis.k, 2.5);
        assert_eq!(cfg.analysis.correlation_workers, 4);
        assert_eq!(cfg.analysis.floor_mode, FloorMode::Suppress);
        assert_eq!(cfg.analysis.combinations_window, 576);

        let policy = cfg.analysis.floor_policy();
        assert_eq!(policy.threshold_for("avg_response_time"), Some(50.0));
        assert_eq!(policy.threshold_for("calls_per_min"), None);
        assert!(cfg.logging.json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[server]\nbind = \"10.0.0.1:8080\"\n").unwrap();
        assert_eq!(cfg.server.bind, "10.0.0.1:8080");
        assert_eq!(cfg.analysis.window, 120);
        assert_eq!(cfg.time.utc_offset, "+03:00");
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        let defaults = Config::default();
        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(cfg.analysis.k, defaults.analysis.k);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.time.utc_offset = "Mars/Olympus".into();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.analysis.window = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.analysis.k = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.analysis.min_correlation = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.analysis.min_absolute_thresholds.insert("cpu_util_pct".into(), f64::NAN);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trendscope.toml");
        std::fs::write(&path, "[analysis]\nwindow = 30\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.analysis.window, 30);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trendscope.toml");
        std::fs::write(&path, "[analysis]\nk = 0.0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/path/trendscope.toml")).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut cfg = Config::default();
        cfg.analysis.min_absolute_thresholds.insert("avg_response_time".into(), 50.0);
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.server.bind, roundtripped.server.bind);
        assert_eq!(cfg.analysis.floor_mode, roundtripped.analysis.floor_mode);
        assert_eq!(
            cfg.analysis.min_absolute_thresholds,
            roundtripped.analysis.min_absolute_thresholds
        );
    }
}
