//! trendscope -- rolling-threshold anomaly detection and pairwise correlation
//! over monitored metric series.
//!
//! This crate provides the series model, the detection and correlation
//! engines, SQLite-backed storage, and the HTTP API served to the dashboard.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod series;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::series::time::SystemClock;

/// Open the configured database, creating its parent directory if needed.
pub fn open_store(config: &Config) -> Result<storage::SqliteStore> {
    let db_path = &config.storage.db_path;
    if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    tracing::info!(%db_path, "Initializing database");
    storage::SqliteStore::open(db_path)
}

/// Start the trendscope API server and run until Ctrl-C.
pub async fn serve(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let state = api::state::AppState::new(store, config, Arc::new(SystemClock))?;
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    tracing::info!(%addr, "trendscope listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    Ok(())
}
