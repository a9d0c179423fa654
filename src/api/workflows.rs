//! Workflow management REST API endpoints
//!
//! CRUD for workflow definitions with hot-reload into the registry. A
//! definition is compiled before it is stored, so invalid graphs are rejected
//! with 422 and never reach storage.

use crate::api::{api_error, internal, ApiError, AppState};
use crate::workflow::registry::CompiledWorkflow;
use crate::workflow::types::WorkflowDefinition;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: WorkflowDefinition,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/workflows/{id}/deactivate", post(deactivate_workflow))
}

fn validate(workflow: &WorkflowDefinition) -> Result<(), ApiError> {
    if workflow.id.trim().is_empty() || workflow.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow id and name are required"));
    }
    CompiledWorkflow::compile(workflow.clone())
        .map(|_| ())
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e))
}

/// Persist, then swap the compiled definition into the registry
async fn store(state: &AppState, workflow: WorkflowDefinition) -> Result<(), ApiError> {
    let registry = &state.engine.registry;
    registry
        .storage()
        .save_workflow(&workflow)
        .await
        .map_err(|e| internal("Failed to save workflow", e))?;
    registry
        .register(workflow)
        .map(|_| ())
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e))
}

/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "triggerType": "...", "nodes": [...], "connections": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;
    validate(&workflow)?;

    match state.engine.registry.storage().get_workflow(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("workflow '{}' already exists", workflow.id),
            ))
        }
        Ok(None) => {}
        Err(e) => return Err(internal("Failed to look up workflow", e)),
    }

    let (id, name) = (workflow.id.clone(), workflow.name.clone());
    store(&state, workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", id, name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id,
            message: format!("Workflow '{}' created successfully", name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .engine
        .registry
        .storage()
        .list_workflows()
        .await
        .map_err(|e| internal("Failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    match state.engine.registry.storage().get_workflow(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => Err(internal("Failed to get workflow", e)),
    }
}

/// PUT /api/workflows/{id}
///
/// Replacing a definition does not touch executions already in flight; they
/// resume against the new graph, and fail if their resume node is gone.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();
    validate(&workflow)?;

    match state.engine.registry.storage().get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => return Err(internal("Failed to look up workflow", e)),
    }

    let name = workflow.name.clone();
    store(&state, workflow).await?;
    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", id, name);

    Ok(Json(WorkflowResponse {
        id,
        message: format!("Workflow '{}' updated successfully", name),
    }))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.engine.registry.storage().delete_workflow(&id).await {
        Ok(true) => {
            state.engine.registry.remove_workflow(&id);
            tracing::info!("Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => Err(internal("Failed to delete workflow", e)),
    }
}

/// POST /api/workflows/{id}/activate
async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    set_active(&state, id, true).await
}

/// POST /api/workflows/{id}/deactivate
///
/// Stops new executions only. Suspended executions still resume.
async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    set_active(&state, id, false).await
}

async fn set_active(state: &AppState, id: String, active: bool) -> Result<Json<WorkflowResponse>, ApiError> {
    let registry = &state.engine.registry;
    match registry.storage().set_active(&id, active).await {
        Ok(true) => {}
        Ok(false) => return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{id}' not found"))),
        Err(e) => return Err(internal("Failed to update workflow", e)),
    }
    registry
        .reload_workflow(&id)
        .await
        .map_err(|e| internal("Failed to reload workflow", e))?;

    let verb = if active { "activated" } else { "deactivated" };
    tracing::info!("🔁 Workflow {}: {}", verb, id);
    Ok(Json(WorkflowResponse {
        message: format!("Workflow '{}' {}", id, verb),
        id,
    }))
}
