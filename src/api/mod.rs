//! HTTP API Layer
//!
//! This module provides the REST endpoints around the engine. It handles:
//! - Workflow CRUD and activation
//! - Status-change events from the host application
//! - Execution inspection for operators
//! - Manual scan and sweep passes

// Workflow management endpoints (POST/GET/PUT/DELETE, activate/deactivate)
pub mod workflows;

// Domain event intake
pub mod events;

// Execution inspection and manual passes
pub mod executions;

pub use events::create_event_routes;
pub use executions::create_execution_routes;
pub use workflows::create_workflow_routes;

use crate::runtime::Engine;
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};

/// Application state shared by every route
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Error response: status plus `{ "error": message }`
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub(crate) fn internal(context: &str, error: impl std::fmt::Display) -> ApiError {
    tracing::error!("{}: {}", context, error);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}
