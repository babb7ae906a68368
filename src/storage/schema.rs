//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 2;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS transaction_metrics (
            id INTEGER PRIMARY KEY,
            node TEXT NOT NULL,
            related_ci TEXT NOT NULL,
            ts INTEGER NOT NULL,
            calls_per_min REAL,
            avg_response_time REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (node, related_ci, ts)
        );

        CREATE TABLE IF NOT EXISTS server_metrics (
            id INTEGER PRIMARY KEY,
            node TEXT NOT NULL,
            ts INTEGER NOT NULL,
            cpu_util_pct REAL,
            mem_util_pct REAL,
            net_packet_count_per_s REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (node, ts)
        );

        CREATE INDEX IF NOT EXISTS idx_transaction_metrics_ts ON transaction_metrics(ts);
        CREATE INDEX IF NOT EXISTS idx_server_metrics_ts ON server_metrics(ts);",
    )?;

    // v2: import provenance on both metric tables.
    for table in ["transaction_metrics", "server_metrics"] {
        let has_source: i32 = conn
            .query_row(
                &format!("SELECT count(*) FROM pragma_table_info('{table}') WHERE name='source'"),
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if has_source == 0 {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN source TEXT"), [])?;
        }
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
