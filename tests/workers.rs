//! Several engines sharing one database file, the way separate worker
//! processes do.

use chrono::Duration;
use serde_json::json;
use statusflow::clock::Clock;
use statusflow::testing::{harness_at, Harness};
use statusflow::{ExecutionStatus, TargetRef};
use tempfile::TempDir;

async fn two_workers() -> (TempDir, Harness, Harness) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("statusflow.db");
    let path = path.to_str().unwrap();

    let a = harness_at(path).await;
    let b = harness_at(path).await;
    for worker in [&a, &b] {
        worker.templates.insert("first", "First", "Now {{trigger.to}}");
        worker.templates.insert("second", "Second", "Still {{trigger.to}}");
        worker
            .applications
            .insert("A-1", "processing", worker.clock.now(), "owner@example.com");
        worker
            .applications
            .insert("A-2", "processing", worker.clock.now(), "other@example.com");
    }
    (dir, a, b)
}

fn follow_up() -> serde_json::Value {
    json!({
        "id": "wf-follow-up",
        "name": "Follow up after an hour",
        "triggerType": "status_changed",
        "triggerConditions": { "to": "processing" },
        "nodes": [
            { "id": "trigger", "type": "trigger" },
            { "id": "first", "type": "email", "config": { "templateId": "first" } },
            { "id": "wait", "type": "delay", "config": { "duration": 1, "unit": "hours" } },
            { "id": "second", "type": "email", "config": { "templateId": "second" } }
        ],
        "connections": [
            { "from": "trigger", "to": "first" },
            { "from": "first", "to": "wait" },
            { "from": "wait", "to": "second" }
        ]
    })
}

#[tokio::test]
async fn another_worker_resumes_a_suspended_execution() {
    let (_dir, a, b) = two_workers().await;
    a.install(follow_up()).await;

    let target = TargetRef::application("A-1");
    a.engine.dispatcher.on_domain_event(&target, "submitted", "processing").await;
    assert_eq!(a.mailer.sent().len(), 1);

    b.clock.advance(Duration::hours(2));
    let sweep = b.engine.continuations.sweep().await.unwrap();
    assert_eq!(sweep.claimed, 1);
    assert_eq!(sweep.completed, 1);
    assert_eq!(sweep.failed, 0);

    let sent = b.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "Still processing");

    let record = &b.engine.ledger.list_for_target(&target).await.unwrap()[0];
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn workflows_saved_elsewhere_are_dispatched() {
    let (_dir, a, b) = two_workers().await;
    a.install(follow_up()).await;

    let report = b
        .engine
        .dispatcher
        .on_domain_event(&TargetRef::application("A-1"), "submitted", "processing")
        .await;
    assert_eq!(report.matched, 1);
    assert_eq!(report.started, 1);
    assert_eq!(b.mailer.sent().len(), 1);
}

#[tokio::test]
async fn deactivation_elsewhere_stops_new_executions() {
    let (_dir, a, b) = two_workers().await;
    a.install(follow_up()).await;

    let first = b
        .engine
        .dispatcher
        .on_domain_event(&TargetRef::application("A-1"), "submitted", "processing")
        .await;
    assert_eq!(first.started, 1);

    assert!(a.engine.registry.storage().set_active("wf-follow-up", false).await.unwrap());
    a.engine.registry.reload_workflow("wf-follow-up").await.unwrap();

    let second = b
        .engine
        .dispatcher
        .on_domain_event(&TargetRef::application("A-2"), "submitted", "processing")
        .await;
    assert_eq!(second.matched, 0);
    assert!(b
        .engine
        .ledger
        .list_for_target(&TargetRef::application("A-2"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn edits_elsewhere_apply_on_resume() {
    let (_dir, a, b) = two_workers().await;
    a.install(follow_up()).await;

    // b compiles and caches the original definition
    b.engine
        .dispatcher
        .on_domain_event(&TargetRef::application("A-1"), "submitted", "processing")
        .await;

    let mut edited = follow_up();
    edited["nodes"][3]["config"]["subject"] = json!("Edited");
    a.install(edited).await;

    b.clock.advance(Duration::hours(1));
    assert_eq!(b.engine.continuations.sweep().await.unwrap().completed, 1);

    let subjects: Vec<_> = b.mailer.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects, vec!["First".to_string(), "Edited".to_string()]);
}
