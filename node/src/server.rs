// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use replica_kernel::types::TableName;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::*;
use crate::errors::NodeError;
use crate::lifecycle::NodeState;
use crate::store::NodeStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<NodeStore>,
    pub state: watch::Receiver<NodeState>,
}

pub type SharedState = Arc<AppState>;

pub fn build_router(store: Arc<NodeStore>, state: watch::Receiver<NodeState>) -> Router {
    Router::new()
        .route("/v1/ledger/status", get(ledger_status))
        .route("/v1/ledger/entries", get(ledger_entries))
        .route("/v1/projection/view", get(projection_view))
        .route("/v1/projection/tables/:table", get(table_records))
        .route("/v1/node/state", get(node_state))
        // Observability
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(AppState { store, state }))
}

async fn ledger_status(State(app): State<SharedState>) -> Json<LedgerStatusResponse> {
    let status = app.store.status().await;
    Json(LedgerStatusResponse::new(app.store.id().clone(), status))
}

async fn ledger_entries(
    State(app): State<SharedState>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, NodeError> {
    let size = app.store.ledger_size();
    if query.from == 0 || query.from > size {
        return Err(replica_kernel::error::KernelError::OutOfRange { from: query.from, size }.into());
    }
    let entries = app.store.read_entries(query.from, query.to).await?;
    Ok(Json(EntriesResponse {
        entries: entries.iter().map(EntryDto::from).collect(),
    }))
}

async fn projection_view(State(app): State<SharedState>) -> Json<NodeViewResponse> {
    let view = app.store.node_view().await;
    Json(NodeViewResponse::from(&view))
}

async fn table_records(
    State(app): State<SharedState>,
    Path(table): Path<String>,
) -> Result<Json<TableRecordsResponse>, NodeError> {
    let table: TableName = table.parse()?;
    let records = app.store.table_records(table).await;
    Ok(Json(TableRecordsResponse { table, records }))
}

async fn node_state(State(app): State<SharedState>) -> Json<NodeStateResponse> {
    let state = app.state.borrow().to_string();
    Json(NodeStateResponse {
        node_id: app.store.id().clone(),
        state,
        ledger_size: app.store.ledger_size(),
        applied_seq: app.store.applied_seq().await,
    })
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
