//! Execution inspection and manual passes
//!
//! Read-only views of the ledger for operators, plus endpoints that run one
//! stuck-entity scan or one continuation sweep on demand.

use crate::api::{api_error, internal, ApiError, AppState};
use crate::ledger::ExecutionRecord;
use crate::runtime::{ScanReport, SweepReport};
use crate::workflow::types::{TargetRef, TargetType};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::str::FromStr;

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/targets/{target_type}/{target_id}/executions", get(list_target_executions))
        .route("/api/scan", post(run_scan))
        .route("/api/sweep", post(run_sweep))
}

/// GET /api/executions/{id}
/// Returns the record plus any continuation waiting to resume it
async fn get_execution(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let record = state
        .engine
        .ledger
        .get(&id)
        .await
        .map_err(|e| internal("Failed to load execution", e))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("execution '{id}' not found")))?;

    let continuations = state
        .engine
        .continuations
        .store()
        .for_execution(&id)
        .await
        .map_err(|e| internal("Failed to load continuations", e))?;

    Ok(Json(json!({ "execution": record, "continuations": continuations })))
}

/// GET /api/targets/{target_type}/{target_id}/executions
async fn list_target_executions(
    State(state): State<AppState>,
    Path((target_type, target_id)): Path<(String, String)>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let target_type = TargetType::from_str(&target_type).map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let target = TargetRef::new(target_type, target_id);

    let records = state
        .engine
        .ledger
        .list_for_target(&target)
        .await
        .map_err(|e| internal("Failed to list executions", e))?;
    Ok(Json(records))
}

/// POST /api/scan
async fn run_scan(State(state): State<AppState>) -> Json<ScanReport> {
    Json(state.engine.scanner.scan().await)
}

/// POST /api/sweep
async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    state
        .engine
        .continuations
        .sweep()
        .await
        .map(Json)
        .map_err(|e| internal("Continuation sweep failed", e))
}
