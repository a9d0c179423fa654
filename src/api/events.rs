//! Domain event intake
//!
//! The host reports status transitions here. Dispatch runs on its own task
//! and the request returns 202 immediately; dispatch failures are logged,
//! never returned.

use crate::api::{api_error, ApiError, AppState};
use crate::workflow::types::{TargetRef, TargetType};
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangedEvent {
    pub target_type: TargetType,
    pub target_id: String,
    pub from: String,
    pub to: String,
}

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/api/events/status-changed", post(status_changed))
}

/// POST /api/events/status-changed
/// Body: { "targetType": "application", "targetId": "42", "from": "property_details", "to": "processing" }
async fn status_changed(
    State(state): State<AppState>,
    Json(event): Json<StatusChangedEvent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if event.target_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "targetId is required"));
    }

    let target = TargetRef::new(event.target_type, event.target_id);
    tracing::info!("📨 Status change {}: {} → {}", target, event.from, event.to);

    state
        .engine
        .dispatcher
        .spawn_domain_event(target.clone(), event.from, event.to);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "target": target })),
    ))
}
