//! Petgraph-backed graph executor
//!
//! Walks a compiled workflow one node at a time, starting at the trigger (or
//! at a continuation's resume node), and drives the execution record through
//! the ledger:
//! - a handler result picks the outgoing edge (`next`, or `yes`/`no`)
//! - a delay suspends: record `suspended` and continuation persisted in one
//!   transaction, walk ends
//! - a node without a matching edge completes the execution
//! - a handler error fails the execution at that node
//!
//! The ledger's conditional transitions are the only coordination between
//! workers; whoever loses a transition stops with [`RunOutcome::Skipped`].

use crate::clock::Clock;
use crate::error::{EngineError, SchedulingError};
use crate::ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus};
use crate::runtime::continuation::{ContinuationStore, ContinuationToken};
use crate::runtime::handlers::{NodeHandlers, NodeInvocation, NodeOutcome};
use crate::workflow::graph::CompiledNode;
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};
use crate::workflow::types::{BranchLabel, ExecutionContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// How a call to [`GraphExecutor::run`] or [`GraphExecutor::resume`] ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Suspended { resume_at: DateTime<Utc> },
    Failed { node_id: String, error: String },
    /// Another worker owns the record, or it is no longer resumable
    Skipped,
}

#[derive(Debug)]
pub struct GraphExecutor {
    ledger: ExecutionLedger,
    handlers: NodeHandlers,
    continuations: ContinuationStore,
    registry: Arc<WorkflowRegistry>,
    clock: Arc<dyn Clock>,
}

impl GraphExecutor {
    pub fn new(
        ledger: ExecutionLedger,
        handlers: NodeHandlers,
        continuations: ContinuationStore,
        registry: Arc<WorkflowRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            handlers,
            continuations,
            registry,
            clock,
        }
    }

    /// Execute a freshly started record from the trigger node
    pub async fn run(
        &self,
        workflow: &CompiledWorkflow,
        record: &ExecutionRecord,
        context: ExecutionContext,
    ) -> Result<RunOutcome, EngineError> {
        if !self.ledger.mark_running(&record.id).await? {
            tracing::debug!(execution_id = %record.id, "⏭️ Execution already claimed, skipping");
            return Ok(RunOutcome::Skipped);
        }

        tracing::info!(
            workflow_id = %workflow.id(),
            execution_id = %record.id,
            entity = %record.target,
            "🚀 Starting workflow execution"
        );
        self.walk(workflow, record, workflow.graph.trigger(), context).await
    }

    /// Continue a suspended execution from its token
    ///
    /// Reads the workflow's current stored definition regardless of its
    /// active flag, so deactivation does not strand executions already in
    /// flight and a token written by another process resumes here.
    pub async fn resume(&self, token: &ContinuationToken) -> Result<RunOutcome, EngineError> {
        let Some(record) = self.ledger.get(&token.execution_id).await? else {
            tracing::warn!(execution_id = %token.execution_id, "⚠️ Continuation refers to unknown execution");
            return Ok(RunOutcome::Skipped);
        };
        if record.status != ExecutionStatus::Suspended {
            tracing::debug!(execution_id = %record.id, status = %record.status, "⏭️ Execution not suspended, skipping");
            return Ok(RunOutcome::Skipped);
        }

        let (workflow, context) = match self.prepare_resume(&record, token).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let error = e.to_string();
                tracing::error!(execution_id = %record.id, error = %error, "❌ Cannot resume execution");
                self.ledger
                    .mark_failed(&record.id, &token.resume_at_node_id, &error)
                    .await?;
                return Ok(RunOutcome::Failed {
                    node_id: token.resume_at_node_id.clone(),
                    error,
                });
            }
        };

        if !self.ledger.mark_running(&record.id).await? {
            tracing::debug!(execution_id = %record.id, "⏭️ Resumption already claimed, skipping");
            return Ok(RunOutcome::Skipped);
        }

        let Some(start) = workflow.graph.node(&token.resume_at_node_id) else {
            // prepare_resume checked the node against this same snapshot
            return Ok(RunOutcome::Skipped);
        };

        tracing::info!(
            workflow_id = %workflow.id(),
            execution_id = %record.id,
            node_id = %start.id,
            "▶️ Resuming workflow execution"
        );
        self.walk(&workflow, &record, start, context).await
    }

    async fn prepare_resume(
        &self,
        record: &ExecutionRecord,
        token: &ContinuationToken,
    ) -> Result<(Arc<CompiledWorkflow>, ExecutionContext), SchedulingError> {
        let context: ExecutionContext = serde_json::from_value(token.context_snapshot.clone())
            .map_err(|e| SchedulingError::Snapshot(e.to_string()))?;

        let workflow = self
            .registry
            .load_current(&record.workflow_id)
            .await
            .ok_or_else(|| SchedulingError::WorkflowMissing(record.workflow_id.clone()))?;

        if workflow.graph.node(&token.resume_at_node_id).is_none() {
            return Err(SchedulingError::NodeMissing {
                workflow_id: record.workflow_id.clone(),
                node_id: token.resume_at_node_id.clone(),
            });
        }

        Ok((workflow, context))
    }

    async fn walk(
        &self,
        workflow: &CompiledWorkflow,
        record: &ExecutionRecord,
        start: &CompiledNode,
        mut context: ExecutionContext,
    ) -> Result<RunOutcome, EngineError> {
        let mut current = start;

        loop {
            context.enter_node(&current.id, self.clock.now());
            let invocation = NodeInvocation {
                workflow,
                record,
                context: &context,
            };

            let label = match self.handlers.execute(current, &invocation).await {
                Ok(NodeOutcome::Continue) => BranchLabel::Next,
                Ok(NodeOutcome::Branch(true)) => BranchLabel::Yes,
                Ok(NodeOutcome::Branch(false)) => BranchLabel::No,
                Ok(NodeOutcome::Suspend { resume_at }) => {
                    return match workflow.graph.successor(&current.id, BranchLabel::Next) {
                        Some(next) => self.suspend(record, current, next, resume_at, &context).await,
                        // Nothing left to wait for
                        None => self.complete(workflow, record).await,
                    };
                }
                Err(e) => {
                    let error = e.to_string();
                    tracing::error!(
                        workflow_id = %workflow.id(),
                        execution_id = %record.id,
                        node_id = %current.id,
                        error = %error,
                        "❌ Workflow execution failed"
                    );
                    self.ledger.mark_failed(&record.id, &current.id, &error).await?;
                    return Ok(RunOutcome::Failed {
                        node_id: current.id.clone(),
                        error,
                    });
                }
            };

            match workflow.graph.successor(&current.id, label) {
                Some(next) => current = next,
                None => return self.complete(workflow, record).await,
            }
        }
    }

    async fn complete(&self, workflow: &CompiledWorkflow, record: &ExecutionRecord) -> Result<RunOutcome, EngineError> {
        if !self.ledger.mark_completed(&record.id).await? {
            tracing::warn!(execution_id = %record.id, "⚠️ Execution changed state underneath us, not completing");
            return Ok(RunOutcome::Skipped);
        }
        tracing::info!(workflow_id = %workflow.id(), execution_id = %record.id, "✅ Workflow execution completed");
        Ok(RunOutcome::Completed)
    }

    /// Suspend and persist the token together. A token that cannot be
    /// written fails the execution at the delay node.
    async fn suspend(
        &self,
        record: &ExecutionRecord,
        delay: &CompiledNode,
        next: &CompiledNode,
        resume_at: DateTime<Utc>,
        context: &ExecutionContext,
    ) -> Result<RunOutcome, EngineError> {
        let scheduled = match serde_json::to_value(context) {
            Ok(snapshot) => self
                .continuations
                .schedule(&self.ledger, &record.id, &next.id, resume_at, snapshot)
                .await
                .map_err(|e| SchedulingError::Persist(e.to_string())),
            Err(e) => Err(SchedulingError::Snapshot(e.to_string())),
        };

        match scheduled {
            Ok(Some(_)) => {
                tracing::info!(
                    execution_id = %record.id,
                    node_id = %delay.id,
                    resume_at = %resume_at,
                    "⏸️ Workflow execution suspended"
                );
                Ok(RunOutcome::Suspended { resume_at })
            }
            Ok(None) => {
                tracing::warn!(execution_id = %record.id, "⚠️ Execution changed state underneath us, not suspending");
                Ok(RunOutcome::Skipped)
            }
            Err(e) => {
                let error = e.to_string();
                tracing::error!(execution_id = %record.id, node_id = %delay.id, error = %error, "❌ Could not persist continuation");
                self.ledger.mark_failed(&record.id, &delay.id, &error).await?;
                Ok(RunOutcome::Failed {
                    node_id: delay.id.clone(),
                    error,
                })
            }
        }
    }
}
