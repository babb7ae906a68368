//! API route definitions.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::form::FormFields;
use super::response::*;
use super::state::AppState;
use crate::detect::AnalysisRequest;
use crate::error::AnalysisError;
use crate::series::time::FixedClock;
use crate::series::{DatasetKind, SeriesKey, TimeWindow};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/data-range", get(data_range))
        .route("/server/data-range", get(server_data_range))
        .route("/nodes", get(nodes))
        .route("/server/nodes", get(server_nodes))
        .route("/related-cis/{node}", get(related_cis))
        .route("/node-relatedci-mapping", get(node_relatedci_mapping))
        .route("/node-time-range/{node}", get(node_time_range))
        .route("/server/node-time-range/{node}", get(server_node_time_range))
        .route("/metrics", get(metrics))
        .route("/dataset-types", get(dataset_types))
        .route("/analyze", post(analyze_transaction))
        .route("/server/analyze", post(analyze_server))
        .route("/anomalous-combinations", get(anomalous_combinations))
        .route("/correlation/transaction", post(correlate_transaction))
        .route("/correlation/server", post(correlate_server))
        .route("/correlation/chart-data", post(chart_data))
        .route("/correlation/status", get(correlation_status))
}

/// Run a storage call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AnalysisError::upstream(format!("storage task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Resolve `start_date`/`end_date`. A missing end anchors on the newest
/// sample of `kind` (or the clock when the dataset is empty).
async fn resolve_window(state: &AppState, kind: DatasetKind, form: &FormFields) -> Result<TimeWindow, ApiError> {
    let start = form.get("start_date");
    let end = form.get("end_date");

    let anchor = if end.is_none() {
        let store = state.store.clone();
        let range = blocking(move || store.data_range(kind)).await?;
        range.last.unwrap_or_else(|| state.clock.now())
    } else {
        state.clock.now()
    };

    Ok(TimeWindow::resolve(
        &state.zone,
        &FixedClock(anchor),
        start,
        end,
        state.defaults.lookback,
    )?)
}

// ---------------------------------------------------------------------------
// Health and catalogue
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": state.zone.format(state.clock.now()),
    }))
}

async fn data_range(State(state): State<AppState>) -> ApiResult<DataRangePayload> {
    let store = state.store.clone();
    let range = blocking(move || store.data_range(DatasetKind::Transaction)).await?;
    Ok(Json(DataRangePayload::new(&range, &state.zone)))
}

async fn server_data_range(State(state): State<AppState>) -> ApiResult<ServerDataRangePayload> {
    let store = state.store.clone();
    let (range, nodes) = blocking(move || {
        Ok((
            store.data_range(DatasetKind::Server)?,
            store.node_ranges(DatasetKind::Server)?,
        ))
    })
    .await?;
    Ok(Json(ServerDataRangePayload::new(&range, &nodes, &state.zone)))
}

async fn nodes(State(state): State<AppState>) -> ApiResult<Value> {
    let store = state.store.clone();
    let nodes = blocking(move || store.nodes(DatasetKind::Transaction)).await?;
    Ok(Json(json!({ "success": true, "count": nodes.len(), "nodes": nodes })))
}

async fn server_nodes(State(state): State<AppState>) -> ApiResult<Value> {
    let store = state.store.clone();
    let nodes = blocking(move || store.nodes(DatasetKind::Server)).await?;
    Ok(Json(json!({ "success": true, "total_nodes": nodes.len(), "nodes": nodes })))
}

async fn related_cis(State(state): State<AppState>, Path(node): Path<String>) -> ApiResult<Value> {
    let store = state.store.clone();
    let lookup = node.clone();
    let cis = blocking(move || store.related_cis(&lookup)).await?;
    Ok(Json(json!({
        "success": true,
        "node": node,
        "count": cis.len(),
        "related_cis": cis,
    })))
}

async fn node_relatedci_mapping(State(state): State<AppState>) -> ApiResult<Value> {
    let store = state.store.clone();
    let mapping = blocking(move || store.node_related_ci_mapping()).await?;

    let nodes: Vec<&String> = mapping.keys().collect();
    let mut relatedcis: Vec<&String> = mapping.values().flatten().collect();
    relatedcis.sort();
    relatedcis.dedup();

    Ok(Json(json!({
        "success": true,
        "nodes": nodes,
        "relatedcis": relatedcis,
        "mapping": mapping,
    })))
}

async fn node_range_for(state: AppState, kind: DatasetKind, node: String) -> ApiResult<NodeTimeRangePayload> {
    let store = state.store.clone();
    let lookup = node.clone();
    let range = blocking(move || store.node_range(kind, &lookup))
        .await?
        .ok_or_else(|| AnalysisError::invalid(format!("no {kind} data for node '{node}'")))?;
    Ok(Json(NodeTimeRangePayload {
        success: true,
        range: NodeRangeItem::new(&range, &state.zone),
        node,
    }))
}

async fn node_time_range(State(state): State<AppState>, Path(node): Path<String>) -> ApiResult<NodeTimeRangePayload> {
    node_range_for(state, DatasetKind::Transaction, node).await
}

async fn server_node_time_range(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> ApiResult<NodeTimeRangePayload> {
    node_range_for(state, DatasetKind::Server, node).await
}

async fn metrics(Query(query): Query<HashMap<String, String>>) -> ApiResult<MetricsPayload> {
    let query = FormFields::from(query);
    let kind = match query.get("dataset_type") {
        Some(raw) => DatasetKind::parse(raw)?,
        None => DatasetKind::Transaction,
    };
    Ok(Json(MetricsPayload {
        success: true,
        dataset_type: kind,
        metrics: kind.metrics(),
        count: kind.metrics().len(),
    }))
}

async fn dataset_types() -> Json<Value> {
    let types: Vec<DatasetTypeItem> = DatasetKind::ALL.into_iter().map(DatasetTypeItem::from).collect();
    Json(json!({ "success": true, "dataset_types": types }))
}

// ---------------------------------------------------------------------------
// Single-series analysis
// ---------------------------------------------------------------------------

async fn run_analysis(state: &AppState, key: SeriesKey, form: &FormFields) -> ApiResult<AnalysisPayload> {
    let request = AnalysisRequest {
        window: resolve_window(state, key.kind(), form).await?,
        window_size: form.parse_or("window", state.defaults.window)?,
        k: form.parse_or("k", state.defaults.k)?,
        key,
    };
    let result = state.anomaly.analyze_blocking(request).await?;
    Ok(Json(AnalysisPayload::new(result, &state.zone)))
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn analyze_transaction(State(state): State<AppState>, form: FormFields) -> ApiResult<AnalysisPayload> {
    let related_ci = form
        .first_of(&["relatedci", "related_ci"])
        .ok_or_else(|| AnalysisError::invalid("missing form field 'relatedci'"))?;
    let key = SeriesKey::new(
        DatasetKind::Transaction,
        form.first_of(&["node", "node_name"]).unwrap_or_default(),
        Some(related_ci),
        form.required("metric")?,
    )?;
    run_analysis(&state, key, &form).await
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn analyze_server(State(state): State<AppState>, form: FormFields) -> ApiResult<AnalysisPayload> {
    let key = SeriesKey::new(
        DatasetKind::Server,
        form.first_of(&["node_name", "node"]).unwrap_or_default(),
        None,
        form.required("metric")?,
    )?;
    run_analysis(&state, key, &form).await
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn anomalous_combinations(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<CombinationsPayload> {
    let query = FormFields::from(query);
    let window = resolve_window(&state, DatasetKind::Transaction, &query).await?;
    let window_size = query.parse_or("window", state.defaults.combinations_window)?;
    let k = query.parse_or("k", state.defaults.combinations_k)?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let report = state
        .anomaly
        .scan_blocking(DatasetKind::Transaction, window, window_size, k, cancel)
        .await?;
    Ok(Json(CombinationsPayload::new(report, &state.zone)))
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

async fn run_correlation(state: &AppState, kind: DatasetKind, form: &FormFields) -> ApiResult<CorrelationPayload> {
    let window = resolve_window(state, kind, form).await?;
    let min_correlation = form.parse_or("min_correlation", state.defaults.min_correlation)?;

    // Dropping the request future (client gone) cancels the computation.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let report = state
        .correlation
        .run_blocking(kind, window, min_correlation, cancel)
        .await?;

    info!(dataset = %kind, pairs = report.all_pairs.len(), "correlation response ready");
    Ok(Json(CorrelationPayload::new(kind, report, &window, &state.zone)))
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn correlate_transaction(State(state): State<AppState>, form: FormFields) -> ApiResult<CorrelationPayload> {
    run_correlation(&state, DatasetKind::Transaction, &form).await
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn correlate_server(State(state): State<AppState>, form: FormFields) -> ApiResult<CorrelationPayload> {
    run_correlation(&state, DatasetKind::Server, &form).await
}

fn pair_key(kind: DatasetKind, form: &FormFields, n: u8) -> Result<SeriesKey, AnalysisError> {
    let node = form.required(&format!("node{n}"))?;
    let metric = form.required(&format!("metric{n}"))?;
    let related_ci = form.get(&format!("relatedci{n}"));
    SeriesKey::new(kind, node, related_ci, metric)
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn chart_data(State(state): State<AppState>, form: FormFields) -> ApiResult<ChartPayload> {
    let kind = DatasetKind::parse(form.required("dataset_type")?)?;
    let key_a = pair_key(kind, &form, 1)?;
    let key_b = pair_key(kind, &form, 2)?;
    let window = resolve_window(&state, kind, &form).await?;

    let pair = state.correlation.pair_blocking(key_a, key_b, window).await?;
    Ok(Json(ChartPayload::new(pair, &state.zone)))
}

async fn correlation_status(State(state): State<AppState>) -> ApiResult<StatusPayload> {
    let store = state.store.clone();
    let (tx, srv) = blocking(move || {
        Ok((
            store.data_range(DatasetKind::Transaction)?,
            store.data_range(DatasetKind::Server)?,
        ))
    })
    .await?;

    let info = |kind, range: &crate::storage::DataRange| {
        (!range.is_empty()).then(|| DatasetInfo::new(kind, range, &state.zone))
    };
    Ok(Json(StatusPayload {
        success: true,
        status: CorrelationStatus {
            transaction_data_available: !tx.is_empty(),
            server_data_available: !srv.is_empty(),
            transaction_data_info: info(DatasetKind::Transaction, &tx),
            server_data_info: info(DatasetKind::Server, &srv),
        },
    }))
}
