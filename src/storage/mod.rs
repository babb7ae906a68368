//! SQLite storage layer -- schema, metric tables, series queries.

pub mod import;
pub mod schema;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::AnalysisError;
use crate::series::{DatasetKind, SeriesKey, SeriesLoader, TimePoint, TimeWindow};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database pool at {path}"))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

fn table(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::Transaction => "transaction_metrics",
        DatasetKind::Server => "server_metrics",
    }
}

fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Whole-second bounds of `window` as stored: the start rounds up and the
/// end rounds down, so no sample outside the window is selected.
fn epoch_bounds(window: &TimeWindow) -> (i64, i64) {
    let start = window.start();
    let rounded_up = i64::from(start.timestamp_subsec_nanos() > 0);
    (start.timestamp() + rounded_up, window.end().timestamp())
}

/// One imported transaction sample (all metrics of a node/CI at one instant).
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub node: String,
    pub related_ci: String,
    pub timestamp: DateTime<Utc>,
    pub calls_per_min: Option<f64>,
    pub avg_response_time: Option<f64>,
}

/// One imported server sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRow {
    pub node: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_util_pct: Option<f64>,
    pub mem_util_pct: Option<f64>,
    pub net_packet_count_per_s: Option<f64>,
}

/// Extent of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRange {
    pub total_records: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub unique_nodes: usize,
    pub unique_related_cis: usize,
}

impl DataRange {
    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }
}

/// Extent of a single node's data.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRange {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub total_records: usize,
}

/// Metric store backed by the connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Upsert transaction rows; a repeated (node, CI, timestamp) replaces
    /// the earlier sample.
    pub fn insert_transaction(&self, rows: &[TransactionRow], source: Option<&str>) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO transaction_metrics
                     (node, related_ci, ts, calls_per_min, avg_response_time, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.node,
                    row.related_ci,
                    row.timestamp.timestamp(),
                    row.calls_per_min,
                    row.avg_response_time,
                    source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn insert_server(&self, rows: &[ServerRow], source: Option<&str>) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO server_metrics
                     (node, ts, cpu_util_pct, mem_util_pct, net_packet_count_per_s, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.node,
                    row.timestamp.timestamp(),
                    row.cpu_util_pct,
                    row.mem_util_pct,
                    row.net_packet_count_per_s,
                    source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn data_range(&self, kind: DatasetKind) -> Result<DataRange> {
        let conn = self.pool.get()?;
        let distinct_ci = match kind {
            DatasetKind::Transaction => "COUNT(DISTINCT related_ci)",
            DatasetKind::Server => "0",
        };
        let sql = format!(
            "SELECT COUNT(*), MIN(ts), MAX(ts), COUNT(DISTINCT node), {distinct_ci} FROM {}",
            table(kind)
        );
        let range = conn.query_row(&sql, [], |row| {
            Ok(DataRange {
                total_records: row.get::<_, i64>(0)? as usize,
                first: row.get::<_, Option<i64>>(1)?.and_then(from_epoch),
                last: row.get::<_, Option<i64>>(2)?.and_then(from_epoch),
                unique_nodes: row.get::<_, i64>(3)? as usize,
                unique_related_cis: row.get::<_, i64>(4)? as usize,
            })
        })?;
        Ok(range)
    }

    pub fn nodes(&self, kind: DatasetKind) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT node FROM {} ORDER BY node",
            table(kind)
        ))?;
        let nodes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    pub fn related_cis(&self, node: &str) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT related_ci FROM transaction_metrics WHERE node = ?1 ORDER BY related_ci",
        )?;
        let cis = stmt
            .query_map([node], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cis)
    }

    pub fn node_related_ci_mapping(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT node, related_ci FROM transaction_metrics ORDER BY node, related_ci",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut mapping: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for r in rows {
            let (node, ci) = r?;
            mapping.entry(node).or_default().push(ci);
        }
        Ok(mapping)
    }

    pub fn node_range(&self, kind: DatasetKind, node: &str) -> Result<Option<NodeRange>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT MIN(ts), MAX(ts), COUNT(*) FROM {} WHERE node = ?1",
            table(kind)
        );
        let row = conn
            .query_row(&sql, [node], |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .optional()?;

        Ok(match row {
            Some((Some(first), Some(last), count)) if count > 0 => {
                match (from_epoch(first), from_epoch(last)) {
                    (Some(first), Some(last)) => Some(NodeRange {
                        first,
                        last,
                        total_records: count as usize,
                    }),
                    _ => None,
                }
            }
            _ => None,
        })
    }

    pub fn node_ranges(&self, kind: DatasetKind) -> Result<BTreeMap<String, NodeRange>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT node, MIN(ts), MAX(ts), COUNT(*) FROM {} GROUP BY node ORDER BY node",
            table(kind)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = BTreeMap::new();
        for r in rows {
            let (node, first, last, count) = r?;
            if let (Some(first), Some(last)) = (from_epoch(first), from_epoch(last)) {
                out.insert(
                    node,
                    NodeRange {
                        first,
                        last,
                        total_records: count as usize,
                    },
                );
            }
        }
        Ok(out)
    }

    fn series_exists(&self, key: &SeriesKey) -> Result<bool> {
        let conn = self.pool.get()?;
        let exists: i64 = match key {
            SeriesKey::Transaction { node, related_ci, .. } => conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM transaction_metrics WHERE node = ?1 AND related_ci = ?2)",
                params![node, related_ci],
                |row| row.get(0),
            )?,
            SeriesKey::Server { node, .. } => conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM server_metrics WHERE node = ?1)",
                params![node],
                |row| row.get(0),
            )?,
        };
        Ok(exists != 0)
    }

    /// `column` must come from the static metric catalog.
    fn query_points(&self, key: &SeriesKey, column: &'static str, window: &TimeWindow) -> Result<Vec<TimePoint>> {
        let conn = self.pool.get()?;
        let (start, end) = epoch_bounds(window);

        let raw: Vec<(i64, f64)> = match key {
            SeriesKey::Transaction { node, related_ci, .. } => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT ts, {column} FROM transaction_metrics
                     WHERE node = ?1 AND related_ci = ?2 AND ts BETWEEN ?3 AND ?4
                       AND {column} IS NOT NULL
                     ORDER BY ts ASC"
                ))?;
                let rows = stmt.query_map(params![node, related_ci, start, end], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            }
            SeriesKey::Server { node, .. } => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT ts, {column} FROM server_metrics
                     WHERE node = ?1 AND ts BETWEEN ?2 AND ?3
                       AND {column} IS NOT NULL
                     ORDER BY ts ASC"
                ))?;
                let rows = stmt.query_map(params![node, start, end], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            }
        };

        Ok(raw
            .into_iter()
            .filter_map(|(ts, value)| from_epoch(ts).map(|t| TimePoint::new(t, value)))
            .collect())
    }

    /// Every series of `kind` with data in `window`, one query per metric.
    fn query_all(&self, kind: DatasetKind, window: &TimeWindow) -> Result<BTreeMap<SeriesKey, Vec<TimePoint>>> {
        let conn = self.pool.get()?;
        let (start, end) = epoch_bounds(window);
        let mut out: BTreeMap<SeriesKey, Vec<TimePoint>> = BTreeMap::new();

        for metric in kind.metrics() {
            let column = metric.value;
            match kind {
                DatasetKind::Transaction => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT node, related_ci, ts, {column} FROM transaction_metrics
                         WHERE ts BETWEEN ?1 AND ?2 AND {column} IS NOT NULL
                         ORDER BY node, related_ci, ts ASC"
                    ))?;
                    let rows = stmt.query_map(params![start, end], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, f64>(3)?,
                        ))
                    })?;
                    for r in rows {
                        let (node, related_ci, ts, value) = r?;
                        if let Some(t) = from_epoch(ts) {
                            let key = SeriesKey::Transaction {
                                node,
                                related_ci,
                                metric: column.to_string(),
                            };
                            out.entry(key).or_default().push(TimePoint::new(t, value));
                        }
                    }
                }
                DatasetKind::Server => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT node, ts, {column} FROM server_metrics
                         WHERE ts BETWEEN ?1 AND ?2 AND {column} IS NOT NULL
                         ORDER BY node, ts ASC"
                    ))?;
                    let rows = stmt.query_map(params![start, end], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, f64>(2)?,
                        ))
                    })?;
                    for r in rows {
                        let (node, ts, value) = r?;
                        if let Some(t) = from_epoch(ts) {
                            let key = SeriesKey::Server {
                                node,
                                metric: column.to_string(),
                            };
                            out.entry(key).or_default().push(TimePoint::new(t, value));
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl SeriesLoader for SqliteStore {
    fn load(&self, key: &SeriesKey, window: &TimeWindow) -> Result<Vec<TimePoint>, AnalysisError> {
        let metric = key.kind().metric(key.metric())?;
        if !self.series_exists(key).map_err(AnalysisError::upstream)? {
            return Err(AnalysisError::invalid(format!("unknown series '{key}'")));
        }
        self.query_points(key, metric.value, window)
            .map_err(AnalysisError::upstream)
    }

    fn keys(&self, kind: DatasetKind, window: &TimeWindow) -> Result<Vec<SeriesKey>, AnalysisError> {
        Ok(self.load_all(kind, window)?.into_keys().collect())
    }

    fn load_all(
        &self,
        kind: DatasetKind,
        window: &TimeWindow,
    ) -> Result<BTreeMap<SeriesKey, Vec<TimePoint>>, AnalysisError> {
        self.query_all(kind, window).map_err(AnalysisError::upstream)
    }
}
