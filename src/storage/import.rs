//! CSV ingestion for both datasets.
//!
//! Header names follow the dashboard exports (`node_name`, `relatedci`,
//! `timestamp`, one column per metric). Rows that fail to parse are logged
//! and skipped; they never abort the import.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::{ServerRow, SqliteStore, TransactionRow};
use crate::series::time::CivilZone;
use crate::series::DatasetKind;

/// Rows are committed in batches of this size.
const BATCH_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
}

#[derive(Debug, Deserialize)]
struct TransactionRecord {
    #[serde(alias = "node_name")]
    node: String,
    #[serde(alias = "relatedci", alias = "related_ci_name")]
    related_ci: String,
    #[serde(alias = "ts", alias = "time")]
    timestamp: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    calls_per_min: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    avg_response_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ServerRecord {
    #[serde(alias = "node_name")]
    node: String,
    #[serde(alias = "ts", alias = "time")]
    timestamp: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    cpu_util_pct: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    mem_util_pct: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    net_packet_count_per_s: Option<f64>,
}

/// Keep only finite metric cells.
fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Samples are keyed by whole epoch seconds.
fn whole_second(ts: DateTime<Utc>) -> bool {
    ts.timestamp_subsec_nanos() == 0
}

pub struct Importer<'a> {
    store: &'a SqliteStore,
    zone: CivilZone,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a SqliteStore, zone: CivilZone) -> Self {
        Self { store, zone }
    }

    pub fn import_file(&self, kind: DatasetKind, path: &Path) -> Result<ImportSummary> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let source = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
        let summary = self
            .import_csv(kind, file, source.as_deref())
            .with_context(|| format!("failed to import {}", path.display()))?;

        info!(
            dataset = %kind,
            file = %path.display(),
            read = summary.rows_read,
            written = summary.rows_written,
            skipped = summary.rows_skipped,
            "import complete"
        );
        Ok(summary)
    }

    pub fn import_csv<R: Read>(&self, kind: DatasetKind, reader: R, source: Option<&str>) -> Result<ImportSummary> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        match kind {
            DatasetKind::Transaction => self.import_transactions(&mut rdr, source),
            DatasetKind::Server => self.import_servers(&mut rdr, source),
        }
    }

    fn import_transactions<R: Read>(&self, rdr: &mut csv::Reader<R>, source: Option<&str>) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        for (line, record) in rdr.deserialize::<TransactionRecord>().enumerate() {
            summary.rows_read += 1;
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "skipping malformed transaction row");
                    summary.rows_skipped += 1;
                    continue;
                }
            };
            let timestamp = match self.zone.parse(&record.timestamp) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "skipping transaction row with bad timestamp");
                    summary.rows_skipped += 1;
                    continue;
                }
            };
            if !whole_second(timestamp) {
                warn!(line = line + 2, timestamp = %record.timestamp, "skipping transaction row with sub-second timestamp");
                summary.rows_skipped += 1;
                continue;
            }
            if record.node.is_empty() || record.related_ci.is_empty() {
                warn!(line = line + 2, "skipping transaction row without node or related CI");
                summary.rows_skipped += 1;
                continue;
            }

            batch.push(TransactionRow {
                node: record.node,
                related_ci: record.related_ci,
                timestamp,
                calls_per_min: finite(record.calls_per_min),
                avg_response_time: finite(record.avg_response_time),
            });
            if batch.len() >= BATCH_SIZE {
                summary.rows_written += self.store.insert_transaction(&batch, source)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            summary.rows_written += self.store.insert_transaction(&batch, source)?;
        }
        Ok(summary)
    }

    fn import_servers<R: Read>(&self, rdr: &mut csv::Reader<R>, source: Option<&str>) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        for (line, record) in rdr.deserialize::<ServerRecord>().enumerate() {
            summary.rows_read += 1;
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "skipping malformed server row");
                    summary.rows_skipped += 1;
                    continue;
                }
            };
            let timestamp = match self.zone.parse(&record.timestamp) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "skipping server row with bad timestamp");
                    summary.rows_skipped += 1;
                    continue;
                }
            };
            if !whole_second(timestamp) {
                warn!(line = line + 2, timestamp = %record.timestamp, "skipping server row with sub-second timestamp");
                summary.rows_skipped += 1;
                continue;
            }
            if record.node.is_empty() {
                warn!(line = line + 2, "skipping server row without node");
                summary.rows_skipped += 1;
                continue;
            }

            batch.push(ServerRow {
                node: record.node,
                timestamp,
                cpu_util_pct: finite(record.cpu_util_pct),
                mem_util_pct: finite(record.mem_util_pct),
                net_packet_count_per_s: finite(record.net_packet_count_per_s),
            });
            if batch.len() >= BATCH_SIZE {
                summary.rows_written += self.store.insert_server(&batch, source)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            summary.rows_written += self.store.insert_server(&batch, source)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{SeriesKey, SeriesLoader, TimeWindow};
    use chrono::{TimeZone, Utc};

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("import.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_import_transactions_with_dashboard_headers() {
        let (_dir, store) = temp_store();
        let csv = "\
node_name,relatedci,timestamp,calls_per_min,avg_response_time
app1,checkout,2024-03-01 10:00:00,120,35.5
app1,checkout,2024-03-01 10:01:00,,36.0
app1,checkout,not-a-time,1,1
app1,checkout,2024-03-01 10:02:00,abc,37.0
";
        let importer = Importer::new(&store, CivilZone::default());
        let summary = importer
            .import_csv(DatasetKind::Transaction, csv.as_bytes(), Some("inline"))
            .unwrap();

        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.rows_skipped, 1);

        // civil time at +03:00
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 7, 5, 0).unwrap(),
        )
        .unwrap();
        let key = SeriesKey::new(DatasetKind::Transaction, "app1", Some("checkout"), "calls_per_min").unwrap();
        let points = store.load(&key, &window).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 120.0);

        let key = SeriesKey::new(DatasetKind::Transaction, "app1", Some("checkout"), "avg_response_time").unwrap();
        assert_eq!(store.load(&key, &window).unwrap().len(), 3);
    }

    #[test]
    fn test_import_server_rows() {
        let (_dir, store) = temp_store();
        let csv = "\
node,timestamp,cpu_util_pct,mem_util_pct,net_packet_count_per_s
db01,2024-03-01T00:00:00Z,10,50,1000
db01,2024-03-01T00:05:00Z,12,51,
,2024-03-01T00:10:00Z,12,51,3
";
        let importer = Importer::new(&store, CivilZone::utc());
        let summary = importer.import_csv(DatasetKind::Server, csv.as_bytes(), None).unwrap();
        assert_eq!(summary, ImportSummary { rows_read: 3, rows_written: 2, rows_skipped: 1 });
        assert_eq!(store.nodes(DatasetKind::Server).unwrap(), vec!["db01"]);
    }

    #[test]
    fn test_sub_second_rows_are_skipped_not_merged() {
        let (_dir, store) = temp_store();
        let csv = "\
node,timestamp,cpu_util_pct,mem_util_pct,net_packet_count_per_s
db01,2024-03-01 00:00:00,10,50,1
db01,2024-03-01 00:00:00.250,11,51,2
db01,2024-03-01 00:00:00.750,12,52,3
";
        let importer = Importer::new(&store, CivilZone::utc());
        let summary = importer.import_csv(DatasetKind::Server, csv.as_bytes(), None).unwrap();
        assert_eq!(summary, ImportSummary { rows_read: 3, rows_written: 1, rows_skipped: 2 });

        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 1, 0).unwrap(),
        )
        .unwrap();
        let key = SeriesKey::new(DatasetKind::Server, "db01", None, "cpu_util_pct").unwrap();
        let points = store.load(&key, &window).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 10.0);
    }

    #[test]
    fn test_import_missing_file_errors() {
        let (_dir, store) = temp_store();
        let importer = Importer::new(&store, CivilZone::utc());
        assert!(importer
            .import_file(DatasetKind::Server, Path::new("/nonexistent/metrics.csv"))
            .is_err());
    }
}
