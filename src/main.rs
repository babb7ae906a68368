use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use trendscope::analysis::correlation::CorrelationEngine;
use trendscope::config::Config;
use trendscope::detect::engine::AnomalyEngine;
use trendscope::detect::AnalysisRequest;
use trendscope::series::{DatasetKind, SeriesKey, TimeWindow};
use trendscope::storage::import::Importer;

#[derive(Parser)]
#[command(
    name = "trendscope",
    about = "Anomaly detection and correlation analysis for monitored metrics",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (defaults: $TRENDSCOPE_CONFIG, then /etc/trendscope/trendscope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dataset {
    Transaction,
    Server,
}

impl From<Dataset> for DatasetKind {
    fn from(d: Dataset) -> Self {
        match d {
            Dataset::Transaction => DatasetKind::Transaction,
            Dataset::Server => DatasetKind::Server,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Import metric rows from a CSV file
    Import {
        #[arg(long, value_enum)]
        dataset: Dataset,

        /// CSV file with a header row
        #[arg(long)]
        file: PathBuf,
    },

    /// Run anomaly detection over one series
    Analyze {
        #[arg(long, value_enum)]
        dataset: Dataset,

        #[arg(long)]
        node: String,

        /// Required for transaction data
        #[arg(long)]
        related_ci: Option<String>,

        #[arg(long)]
        metric: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Rolling window in samples (defaults to analysis.window)
        #[arg(long)]
        window: Option<usize>,

        /// Band half-width in standard deviations (defaults to analysis.k)
        #[arg(long)]
        k: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Correlate every pair of series in a dataset
    Correlate {
        #[arg(long, value_enum)]
        dataset: Dataset,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Minimum |r| to report (defaults to analysis.min_correlation)
        #[arg(long)]
        min_correlation: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show what data is available
    Status,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;
            tracing::info!(bind = %config.server.bind, "Starting trendscope");
            trendscope::serve(&config).await?;
        }
        Commands::Import { dataset, file } => {
            let store = trendscope::open_store(&config)?;
            let importer = Importer::new(&store, config.time.zone()?);
            let summary = importer.import_file(dataset.into(), &file)?;
            println!(
                "Imported {} of {} rows from {} ({} skipped).",
                summary.rows_written,
                summary.rows_read,
                file.display(),
                summary.rows_skipped
            );
        }
        Commands::Analyze {
            dataset,
            node,
            related_ci,
            metric,
            start,
            end,
            window,
            k,
            json,
        } => {
            let zone = config.time.zone()?;
            let store = trendscope::open_store(&config)?;
            let engine = AnomalyEngine::new(Arc::new(store), config.analysis.floor_policy());
            let request = AnalysisRequest {
                key: SeriesKey::new(dataset.into(), &node, related_ci.as_deref(), &metric)?,
                window: TimeWindow::parse(&zone, &start, &end)?,
                window_size: window.unwrap_or(config.analysis.window),
                k: k.unwrap_or(config.analysis.k),
            };
            let key = request.key.clone();
            let result = engine.analyze_blocking(request).await?;

            if json {
                let payload = trendscope::api::response::AnalysisPayload::new(result, &zone);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("\nAnomaly report for {key}");
                println!("{:<22} : {}", "Records", result.total_records);
                println!(
                    "{:<22} : {} ({:.2}%)",
                    "Anomalies",
                    result.anomaly_count,
                    result.anomaly_rate * 100.0
                );
                println!(
                    "{:<22} : {:.3} / {:.3} / {:.3}",
                    "Min / avg / max", result.min_value, result.avg_value, result.max_value
                );
                if result.min_absolute_threshold > 0.0 {
                    println!("{:<22} : {}", "Absolute floor", result.min_absolute_threshold);
                }
                for (ts, value) in result.anomaly_timestamps.iter().zip(&result.anomaly_values) {
                    println!(" - {} : {}", zone.format(*ts), value);
                }
                println!();
            }
        }
        Commands::Correlate {
            dataset,
            start,
            end,
            min_correlation,
            json,
        } => {
            let zone = config.time.zone()?;
            let kind: DatasetKind = dataset.into();
            let window = TimeWindow::parse(&zone, &start, &end)?;
            let store = trendscope::open_store(&config)?;
            let engine = CorrelationEngine::new(Arc::new(store), config.analysis.correlation_workers);
            let report = engine
                .run_blocking(
                    kind,
                    window,
                    min_correlation.unwrap_or(config.analysis.min_correlation),
                    CancellationToken::new(),
                )
                .await?;

            if json {
                let payload = trendscope::api::response::CorrelationPayload::new(kind, report, &window, &zone);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                let s = &report.summary;
                println!("\nCorrelation report ({kind}, {} series)", report.series_analyzed);
                println!(
                    "Strong: {}  Moderate: {}  Weak: {}",
                    s.strong_correlation_count, s.moderate_correlation_count, s.weak_correlation_count
                );
                println!(
                    "Mean r: {:.3}  Median r: {:.3}  Std: {:.3}",
                    s.average_correlation, s.median_correlation, s.std_correlation
                );
                println!("{:<40} | {:<40} | {:>7} | Points", "Series A", "Series B", "r");
                println!("{:-<40}-|-{:-<40}-|-{:->7}-|-{:-<6}", "", "", "", "");
                for pair in &report.all_pairs {
                    println!(
                        "{:<40} | {:<40} | {:>7.3} | {}",
                        pair.key_a.to_string(),
                        pair.key_b.to_string(),
                        pair.coefficient,
                        pair.common_timestamp_count
                    );
                }
                println!();
            }
        }
        Commands::Status => {
            let zone = config.time.zone()?;
            let store = trendscope::open_store(&config)?;
            println!("{:<12} | {:>8} | {:>5} | {:<19} | {:<19}", "Dataset", "Records", "Nodes", "First", "Last");
            println!("{:-<12}-|-{:->8}-|-{:->5}-|-{:-<19}-|-{:-<19}", "", "", "", "", "");
            for kind in DatasetKind::ALL {
                let range = store.data_range(kind)?;
                let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| {
                    t.map(|t| zone.format(t)).unwrap_or_else(|| "-".to_string())
                };
                println!(
                    "{:<12} | {:>8} | {:>5} | {:<19} | {:<19}",
                    kind.as_str(),
                    range.total_records,
                    range.unique_nodes,
                    fmt(range.first),
                    fmt(range.last)
                );
            }
        }
    }

    Ok(())
}
