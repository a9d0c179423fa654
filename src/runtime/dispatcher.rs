//! Status-change trigger dispatch
//!
//! The host calls [`TriggerDispatcher::on_domain_event`] (or the spawning
//! variant) whenever a target changes status. Every `status_changed`
//! workflow that is active in storage at that moment and whose conditions
//! match gets an execution. Failures are logged per
//! workflow and never reach the caller.

use crate::error::{DispatchError, EngineError};
use crate::ledger::ExecutionLedger;
use crate::runtime::engine::{GraphExecutor, RunOutcome};
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};
use crate::workflow::types::{ExecutionContext, TargetRef, TriggerType};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Tally of one domain event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Active workflows whose conditions matched the transition
    pub matched: usize,
    pub started: usize,
    /// Run-once executions that already existed
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct TriggerDispatcher {
    registry: Arc<WorkflowRegistry>,
    ledger: ExecutionLedger,
    executor: Arc<GraphExecutor>,
}

impl TriggerDispatcher {
    pub fn new(registry: Arc<WorkflowRegistry>, ledger: ExecutionLedger, executor: Arc<GraphExecutor>) -> Self {
        Self {
            registry,
            ledger,
            executor,
        }
    }

    /// Start every matching workflow for a `from → to` transition of `target`
    pub async fn on_domain_event(&self, target: &TargetRef, from_status: &str, to_status: &str) -> DispatchReport {
        let mut report = DispatchReport::default();

        let matching: Vec<_> = self
            .registry
            .load_active(TriggerType::StatusChanged)
            .await
            .into_iter()
            .filter(|w| w.trigger.matches_transition(target.target_type, from_status, to_status))
            .collect();
        report.matched = matching.len();

        tracing::debug!(
            entity = %target,
            from = from_status,
            to = to_status,
            matched = report.matched,
            "📨 Domain event received"
        );

        for workflow in matching {
            let context = ExecutionContext::from_status_change(from_status, to_status);
            match self.dispatch_one(&workflow, target, context).await {
                Ok(Some(_)) => report.started += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(error = %e, "❌ Workflow dispatch failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Run [`Self::on_domain_event`] on its own task so the caller never waits
    pub fn spawn_domain_event(
        self: &Arc<Self>,
        target: TargetRef,
        from_status: String,
        to_status: String,
    ) -> JoinHandle<DispatchReport> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.on_domain_event(&target, &from_status, &to_status).await })
    }

    /// `Ok(None)` when the ledger says this run-once execution already exists
    async fn dispatch_one(
        &self,
        workflow: &CompiledWorkflow,
        target: &TargetRef,
        context: ExecutionContext,
    ) -> Result<Option<RunOutcome>, DispatchError> {
        let wrap = |source: EngineError| DispatchError {
            workflow_id: workflow.id().to_string(),
            target: target.clone(),
            source,
        };

        let attempt = self
            .ledger
            .try_start(workflow.id(), target, TriggerType::StatusChanged, workflow.trigger.run_once())
            .await
            .map_err(wrap)?;
        if !attempt.started {
            tracing::debug!(workflow_id = %workflow.id(), entity = %target, "⏭️ Run-once workflow already executed");
            return Ok(None);
        }

        let outcome = self
            .executor
            .run(workflow, &attempt.record, context)
            .await
            .map_err(wrap)?;
        Ok(Some(outcome))
    }
}
