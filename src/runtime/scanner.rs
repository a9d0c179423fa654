//! Stuck-entity scanner
//!
//! Periodically finds targets that have sat in a status longer than an
//! active `stuck_at_status` workflow allows and starts that workflow for
//! them. Several processes may scan at once; the ledger decides who runs.

use crate::clock::Clock;
use crate::collaborators::TargetAccessors;
use crate::error::{DispatchError, EngineError};
use crate::ledger::ExecutionLedger;
use crate::runtime::engine::GraphExecutor;
use crate::workflow::config::TriggerSpec;
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};
use crate::workflow::types::{ExecutionContext, TargetRef, TriggerType};
use serde::Serialize;
use std::sync::Arc;

/// Tally of one scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub workflows_scanned: usize,
    /// Targets past a workflow's threshold
    pub candidates: usize,
    pub started: usize,
    /// Candidates with an existing run-once execution
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct StuckEntityScanner {
    registry: Arc<WorkflowRegistry>,
    ledger: ExecutionLedger,
    executor: Arc<GraphExecutor>,
    targets: TargetAccessors,
    clock: Arc<dyn Clock>,
}

impl StuckEntityScanner {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        ledger: ExecutionLedger,
        executor: Arc<GraphExecutor>,
        targets: TargetAccessors,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledger,
            executor,
            targets,
            clock,
        }
    }

    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();

        for workflow in self.registry.load_active(TriggerType::StuckAtStatus).await {
            report.workflows_scanned += 1;
            self.scan_workflow(&workflow, &mut report).await;
        }

        if report.candidates > 0 || report.failed > 0 {
            tracing::info!(
                workflows = report.workflows_scanned,
                candidates = report.candidates,
                started = report.started,
                skipped = report.skipped,
                failed = report.failed,
                "🔍 Stuck-entity scan finished"
            );
        }
        report
    }

    async fn scan_workflow(&self, workflow: &CompiledWorkflow, report: &mut ScanReport) {
        let TriggerSpec::StuckAtStatus {
            target_type,
            status,
            threshold,
            run_once,
        } = &workflow.trigger
        else {
            return;
        };

        let now = self.clock.now();
        let Some(cutoff) = now.checked_sub_signed(*threshold) else {
            tracing::warn!(workflow_id = %workflow.id(), "⚠️ Stuck threshold reaches before the epoch, skipping");
            return;
        };

        let target_types = match target_type {
            Some(t) => vec![*t],
            None => self.targets.target_types(),
        };

        for target_type in target_types {
            let Some(accessor) = self.targets.get(target_type) else {
                tracing::warn!(
                    workflow_id = %workflow.id(),
                    target_type = %target_type,
                    "⚠️ No accessor registered for target type"
                );
                continue;
            };

            let ids = match accessor.find_in_status_since(status, cutoff).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!(
                        workflow_id = %workflow.id(),
                        target_type = %target_type,
                        error = %e,
                        "❌ Stuck-entity query failed"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            for id in ids {
                report.candidates += 1;
                let target = TargetRef::new(target_type, id);

                // Prefer the real change time for the trigger data
                let since = match accessor.status_changed_at(&target.id).await {
                    Ok(Some(at)) => at,
                    _ => cutoff,
                };
                let context = ExecutionContext::from_stuck_scan(status, since);

                match self.start(workflow, &target, *run_once, context).await {
                    Ok(true) => report.started += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "❌ Stuck-entity dispatch failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    async fn start(
        &self,
        workflow: &CompiledWorkflow,
        target: &TargetRef,
        run_once: bool,
        context: ExecutionContext,
    ) -> Result<bool, DispatchError> {
        let wrap = |source: EngineError| DispatchError {
            workflow_id: workflow.id().to_string(),
            target: target.clone(),
            source,
        };

        let attempt = self
            .ledger
            .try_start(workflow.id(), target, TriggerType::StuckAtStatus, run_once)
            .await
            .map_err(wrap)?;
        if !attempt.started {
            return Ok(false);
        }

        let outcome = self
            .executor
            .run(workflow, &attempt.record, context)
            .await
            .map_err(wrap)?;
        tracing::debug!(workflow_id = %workflow.id(), entity = %target, ?outcome, "Stuck-entity execution ran");
        Ok(true)
    }
}
