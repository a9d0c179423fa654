//! HTTP surface: workflow management, event intake and inspection routes.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use statusflow::server::router;
use statusflow::clock::Clock;
use statusflow::testing::{harness, Harness};
use statusflow::{ExecutionStatus, TargetRef};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(h.engine.clone())
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

fn welcome_workflow() -> Value {
    json!({
        "id": "wf-welcome",
        "name": "Welcome",
        "triggerType": "status_changed",
        "triggerConditions": { "to": "accepted" },
        "nodes": [
            { "id": "trigger", "type": "trigger" },
            { "id": "mail", "type": "email", "config": { "templateId": "welcome" } }
        ],
        "connections": [ { "from": "trigger", "to": "mail" } ]
    })
}

#[tokio::test]
async fn health_check_responds() {
    let h = harness().await;
    let (status, body) = send(app(&h), Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn workflow_lifecycle_over_http() {
    let h = harness().await;

    let (status, body) = send(
        app(&h),
        Method::POST,
        "/api/workflows",
        Some(json!({ "workflow": welcome_workflow() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], json!("wf-welcome"));
    assert!(h.engine.registry.get_workflow("wf-welcome").is_some());

    let (status, _) = send(
        app(&h),
        Method::POST,
        "/api/workflows",
        Some(json!({ "workflow": welcome_workflow() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(app(&h), Method::GET, "/api/workflows/wf-welcome", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("Welcome"));

    let (status, body) = send(app(&h), Method::GET, "/api/workflows", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workflows"].as_array().unwrap().len(), 1);

    let (status, _) = send(app(&h), Method::POST, "/api/workflows/wf-welcome/deactivate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.engine.registry.get_workflow("wf-welcome").unwrap().is_active());

    let (status, _) = send(app(&h), Method::POST, "/api/workflows/wf-welcome/activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.engine.registry.get_workflow("wf-welcome").unwrap().is_active());

    let (status, _) = send(app(&h), Method::DELETE, "/api/workflows/wf-welcome", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.engine.registry.get_workflow("wf-welcome").is_none());

    let (status, body) = send(app(&h), Method::GET, "/api/workflows/wf-welcome", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("wf-welcome"));
}

#[tokio::test]
async fn invalid_graphs_are_rejected_before_storage() {
    let h = harness().await;
    let mut workflow = welcome_workflow();
    workflow["connections"] = json!([
        { "from": "trigger", "to": "mail" },
        { "from": "mail", "to": "trigger" }
    ]);

    let (status, body) = send(app(&h), Method::POST, "/api/workflows", Some(json!({ "workflow": workflow }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());
    assert!(h.engine.registry.storage().get_workflow("wf-welcome").await.unwrap().is_none());

    let mut unnamed = welcome_workflow();
    unnamed["name"] = json!("  ");
    let (status, _) = send(app(&h), Method::POST, "/api/workflows", Some(json!({ "workflow": unnamed }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn updating_an_unknown_workflow_is_not_found() {
    let h = harness().await;
    let (status, _) = send(
        app(&h),
        Method::PUT,
        "/api/workflows/wf-welcome",
        Some(json!({ "workflow": welcome_workflow() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_change_events_are_accepted_and_dispatched() {
    let h = harness().await;
    h.templates.insert("welcome", "Welcome aboard", "Hello {{user.email}}");
    h.install(welcome_workflow()).await;
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let (status, body) = send(
        app(&h),
        Method::POST,
        "/api/events/status-changed",
        Some(json!({ "targetType": "application", "targetId": "A-1", "from": "in_review", "to": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], json!(true));

    // Dispatch runs on a spawned task
    let target = TargetRef::application("A-1");
    let mut records = Vec::new();
    for _ in 0..100 {
        records = h.engine.ledger.list_for_target(&target).await.unwrap();
        if records.iter().any(|r| r.status.is_terminal()) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Completed);
    assert_eq!(h.mailer.sent()[0].content, "Hello a1@example.com");

    let (status, body) = send(app(&h), Method::GET, "/api/targets/application/A-1/executions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["workflow_id"], json!("wf-welcome"));
    assert_eq!(body[0]["status"], json!("completed"));

    let uri = format!("/api/executions/{}", records[0].id);
    let (status, body) = send(app(&h), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["execution"]["id"], json!(records[0].id));
    assert_eq!(body["continuations"], json!([]));
}

#[tokio::test]
async fn inspection_rejects_unknown_targets_and_executions() {
    let h = harness().await;

    let (status, _) = send(app(&h), Method::GET, "/api/targets/invoice/1/executions", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app(&h), Method::GET, "/api/executions/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&h),
        Method::POST,
        "/api/events/status-changed",
        Some(json!({ "targetType": "application", "targetId": " ", "from": "a", "to": "b" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scan_and_sweep_can_be_triggered_manually() {
    let h = harness().await;
    h.templates.insert("stuck", "Stuck", "Still waiting");
    h.install(json!({
        "id": "wf-stuck",
        "name": "Stuck",
        "triggerType": "stuck_at_status",
        "triggerConditions": { "stuckStatus": "submitted", "duration": 1, "unit": "days", "runOnce": true },
        "nodes": [
            { "id": "trigger", "type": "trigger" },
            { "id": "mail", "type": "email", "config": { "templateId": "stuck" } }
        ],
        "connections": [ { "from": "trigger", "to": "mail" } ]
    }))
    .await;
    h.applications
        .insert("A-1", "submitted", h.clock.now() - Duration::days(2), "a1@example.com");

    let (status, body) = send(app(&h), Method::POST, "/api/scan", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], json!(1));
    assert_eq!(h.mailer.sent().len(), 1);

    let (status, body) = send(app(&h), Method::POST, "/api/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["due"], json!(0));
}
