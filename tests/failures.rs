//! Handler failures, timeouts and the fail-safe paths that must never reach
//! whoever emitted the domain event.

use serde_json::json;
use statusflow::config::Config;
use statusflow::clock::Clock;
use statusflow::testing::{harness, harness_with};
use statusflow::{ExecutionStatus, TargetRef};
use std::time::Duration;

fn webhook_then_email(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Notify CRM",
        "triggerType": "status_changed",
        "triggerConditions": { "to": "accepted" },
        "nodes": [
            { "id": "trigger", "type": "trigger" },
            { "id": "crm", "type": "webhook",
              "config": { "url": "https://crm.example.com/hooks/accepted", "headers": { "x-api-key": "k" } } },
            { "id": "mail", "type": "email", "config": { "templateId": "accepted" } }
        ],
        "connections": [
            { "from": "trigger", "to": "crm" },
            { "from": "crm", "to": "mail" }
        ]
    })
}

#[tokio::test]
async fn webhook_sends_execution_payload() {
    let h = harness().await;
    h.templates.insert("accepted", "Accepted", "ok");
    h.install(webhook_then_email("wf-crm")).await;
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let target = TargetRef::application("A-1");
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    let requests = h.http.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://crm.example.com/hooks/accepted");
    assert_eq!(requests[0].headers.get("x-api-key").map(String::as_str), Some("k"));

    let body = requests[0].body.clone().unwrap();
    assert_eq!(body["workflow"]["id"], json!("wf-crm"));
    assert_eq!(body["target"], json!({ "targetType": "application", "id": "A-1" }));
    assert_eq!(body["trigger"]["to"], json!("accepted"));
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn non_success_webhook_fails_at_that_node() {
    let h = harness().await;
    h.templates.insert("accepted", "Accepted", "ok");
    h.install(webhook_then_email("wf-crm")).await;
    h.http.respond_with(503);
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let target = TargetRef::application("A-1");
    let report = h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;
    assert_eq!(report.started, 1);
    assert_eq!(report.failed, 0);

    let record = &h.engine.ledger.list_for_target(&target).await.unwrap()[0];
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.failed_node_id.as_deref(), Some("crm"));
    assert!(record.error.as_deref().unwrap().contains("503"));
    assert!(record.finished_at.is_some());
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn unreachable_webhook_fails_at_that_node() {
    let h = harness().await;
    h.templates.insert("accepted", "Accepted", "ok");
    h.install(webhook_then_email("wf-crm")).await;
    h.http.fail_with("connection refused");
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let target = TargetRef::application("A-1");
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    let record = &h.engine.ledger.list_for_target(&target).await.unwrap()[0];
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.failed_node_id.as_deref(), Some("crm"));
    assert!(record.error.as_deref().unwrap().contains("connection refused"));
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn slow_handlers_time_out() {
    let mut engine = Config::default().engine;
    engine.timeouts.webhook = Duration::from_millis(50);
    let h = harness_with(engine).await;
    h.templates.insert("accepted", "Accepted", "ok");
    h.install(webhook_then_email("wf-crm")).await;
    h.http.delay_responses(Duration::from_secs(5));
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let target = TargetRef::application("A-1");
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    let record = &h.engine.ledger.list_for_target(&target).await.unwrap()[0];
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.failed_node_id.as_deref(), Some("crm"));
    assert!(record.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn missing_owner_email_fails_the_email_node() {
    let h = harness().await;
    h.templates.insert("accepted", "Accepted", "ok");
    h.install(webhook_then_email("wf-crm")).await;
    h.applications.insert("A-1", "accepted", h.clock.now(), "");

    let target = TargetRef::application("A-1");
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    let record = &h.engine.ledger.list_for_target(&target).await.unwrap()[0];
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.failed_node_id.as_deref(), Some("mail"));
    assert!(record.error.as_deref().unwrap().contains("owner email"));
}

#[tokio::test]
async fn delivery_and_template_errors_fail_the_execution() {
    let h = harness().await;
    h.install(webhook_then_email("wf-crm")).await;
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");
    let target = TargetRef::application("A-1");

    // No "accepted" template registered yet
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    h.templates.insert("accepted", "Accepted", "ok");
    h.mailer.fail_with("smtp unavailable");
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    let records = h.engine.ledger.list_for_target(&target).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == ExecutionStatus::Failed));

    let errors: Vec<_> = records.iter().filter_map(|r| r.error.clone()).collect();
    assert!(errors.iter().any(|e| e.contains("not found")));
    assert!(errors.iter().any(|e| e.contains("smtp unavailable")));
}

#[tokio::test]
async fn one_failing_workflow_does_not_affect_another() {
    let h = harness().await;
    h.templates.insert("accepted", "Accepted", "ok");
    h.install(webhook_then_email("wf-crm")).await;
    h.install(json!({
        "id": "wf-thanks",
        "name": "Thank you",
        "triggerType": "status_changed",
        "triggerConditions": { "to": "accepted" },
        "nodes": [
            { "id": "trigger", "type": "trigger" },
            { "id": "thanks", "type": "email", "config": { "templateId": "accepted", "subject": "Thanks" } }
        ],
        "connections": [ { "from": "trigger", "to": "thanks" } ]
    }))
    .await;
    h.http.respond_with(500);
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let report = h
        .engine
        .dispatcher
        .on_domain_event(&TargetRef::application("A-1"), "in_review", "accepted")
        .await;
    assert_eq!(report.matched, 2);
    assert_eq!(report.started, 2);

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Thanks");
}

#[tokio::test]
async fn storage_failures_are_swallowed_by_the_dispatcher() {
    let h = harness().await;
    h.install(webhook_then_email("wf-crm")).await;
    sqlx::query("DROP TABLE workflow_executions")
        .execute(&h.pool)
        .await
        .unwrap();

    let report = h
        .engine
        .dispatcher
        .on_domain_event(&TargetRef::application("A-1"), "in_review", "accepted")
        .await;
    assert_eq!(report.matched, 1);
    assert_eq!(report.failed, 1);

    let handle = h.engine.dispatcher.spawn_domain_event(
        TargetRef::application("A-1"),
        "in_review".to_string(),
        "accepted".to_string(),
    );
    assert_eq!(handle.await.unwrap().failed, 1);
}

#[tokio::test]
async fn missing_field_takes_the_no_branch() {
    let h = harness().await;
    h.templates.insert("vip", "VIP", "vip");
    h.templates.insert("standard", "Standard", "standard");
    h.install(json!({
        "id": "wf-tier",
        "name": "Tiered welcome",
        "triggerType": "status_changed",
        "triggerConditions": { "to": "accepted" },
        "nodes": [
            { "id": "trigger", "type": "trigger" },
            { "id": "is-vip", "type": "condition",
              "config": { "conditionType": "field_equals", "field": "tier", "conditionValue": "gold" } },
            { "id": "vip", "type": "email", "config": { "templateId": "vip" } },
            { "id": "standard", "type": "email", "config": { "templateId": "standard" } }
        ],
        "connections": [
            { "from": "trigger", "to": "is-vip" },
            { "from": "is-vip", "to": "vip", "type": "yes" },
            { "from": "is-vip", "to": "standard", "type": "no" }
        ]
    }))
    .await;
    h.applications.insert("A-1", "accepted", h.clock.now(), "a1@example.com");

    let target = TargetRef::application("A-1");
    h.engine.dispatcher.on_domain_event(&target, "in_review", "accepted").await;

    let subjects: Vec<_> = h.mailer.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects, vec!["Standard".to_string()]);
    assert_eq!(
        h.engine.ledger.list_for_target(&target).await.unwrap()[0].status,
        ExecutionStatus::Completed
    );
}
