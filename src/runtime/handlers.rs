//! Node execution handlers
//!
//! One handler per node kind. A handler performs its side effect through the
//! host collaborators and reports how the walk continues:
//! - trigger: pass-through
//! - email: render a template for the target's owner and deliver it
//! - delay: ask the executor to suspend until `now + duration`
//! - condition: evaluate a closed predicate against live target attributes
//! - webhook: outbound HTTP call, non-2xx is a failure
//! - mutate_target / tag_target: write to the target
//!
//! Every call is bounded by a per-node-type timeout.

use crate::clock::Clock;
use crate::collaborators::{Collaborators, TargetAccessor};
use crate::error::HandlerExecutionError;
use crate::ledger::ExecutionRecord;
use crate::workflow::config::{DelayConfig, EmailConfig, Predicate, WebhookConfig};
use crate::workflow::graph::CompiledNode;
use crate::workflow::registry::CompiledWorkflow;
use crate::workflow::types::{ExecutionContext, NodeType};
use crate::workflow::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// How the walk proceeds after a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Follow the `next` edge
    Continue,
    /// Follow `yes` (true) or `no` (false)
    Branch(bool),
    /// Persist a continuation and stop until `resume_at`
    Suspend { resume_at: DateTime<Utc> },
}

/// Upper bounds for a single handler call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTimeouts {
    #[serde(with = "millis")]
    pub email: Duration,
    #[serde(with = "millis")]
    pub webhook: Duration,
    /// mutate_target and tag_target
    #[serde(with = "millis")]
    pub mutation: Duration,
    #[serde(with = "millis")]
    pub condition: Duration,
}

impl Default for NodeTimeouts {
    fn default() -> Self {
        Self {
            email: Duration::from_secs(30),
            webhook: Duration::from_secs(30),
            mutation: Duration::from_secs(10),
            condition: Duration::from_secs(10),
        }
    }
}

impl NodeTimeouts {
    /// `None` for node types that never leave the process
    pub fn for_node(&self, node_type: NodeType) -> Option<Duration> {
        match node_type {
            NodeType::Email => Some(self.email),
            NodeType::Webhook => Some(self.webhook),
            NodeType::MutateTarget | NodeType::TagTarget => Some(self.mutation),
            NodeType::Condition => Some(self.condition),
            NodeType::Trigger | NodeType::Delay => None,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// What a handler may read about the execution it runs in
#[derive(Debug, Clone, Copy)]
pub struct NodeInvocation<'a> {
    pub workflow: &'a CompiledWorkflow,
    pub record: &'a ExecutionRecord,
    pub context: &'a ExecutionContext,
}

/// Dispatches node visits to the handler for their kind
#[derive(Debug)]
pub struct NodeHandlers {
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    timeouts: NodeTimeouts,
}

impl NodeHandlers {
    pub fn new(collaborators: Collaborators, clock: Arc<dyn Clock>, timeouts: NodeTimeouts) -> Self {
        Self {
            collaborators,
            clock,
            timeouts,
        }
    }

    /// Execute one node, bounded by its type's timeout
    pub async fn execute(
        &self,
        node: &CompiledNode,
        invocation: &NodeInvocation<'_>,
    ) -> Result<NodeOutcome, HandlerExecutionError> {
        let node_type = node.kind.node_type();
        tracing::debug!(
            execution_id = %invocation.record.id,
            node_id = %node.id,
            node_type = %node_type,
            "🚀 Starting node execution"
        );
        let start_time = std::time::Instant::now();

        let fut = self.dispatch(node, invocation);
        let result = match self.timeouts.for_node(node_type) {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(HandlerExecutionError::Timeout {
                    node_type,
                    after: limit,
                }),
            },
            None => fut.await,
        };

        match &result {
            Ok(outcome) => tracing::debug!(
                execution_id = %invocation.record.id,
                node_id = %node.id,
                ?outcome,
                "✅ Node execution completed in {:?}",
                start_time.elapsed()
            ),
            Err(e) => tracing::warn!(
                execution_id = %invocation.record.id,
                node_id = %node.id,
                error = %e,
                "❌ Node execution failed in {:?}",
                start_time.elapsed()
            ),
        }

        result
    }

    async fn dispatch(
        &self,
        node: &CompiledNode,
        invocation: &NodeInvocation<'_>,
    ) -> Result<NodeOutcome, HandlerExecutionError> {
        match &node.kind {
            NodeKind::Trigger => Ok(NodeOutcome::Continue),
            NodeKind::Email(config) => self.send_email(config, invocation).await,
            NodeKind::Delay(config) => Ok(self.delay(config)),
            NodeKind::Condition(predicate) => self.evaluate(&node.id, predicate, invocation).await,
            NodeKind::Webhook(config) => self.call_webhook(config, invocation).await,
            NodeKind::MutateTarget(config) => {
                self.accessor(invocation)?
                    .set_field(&invocation.record.target.id, &config.field, config.value.clone())
                    .await?;
                tracing::info!(entity = %invocation.record.target, field = %config.field, "✏️ Target field updated");
                Ok(NodeOutcome::Continue)
            }
            NodeKind::TagTarget(config) => {
                self.accessor(invocation)?
                    .tag(&invocation.record.target.id, &config.value)
                    .await?;
                tracing::info!(entity = %invocation.record.target, tag = %config.value, "🏷️ Target tagged");
                Ok(NodeOutcome::Continue)
            }
        }
    }

    fn accessor(&self, invocation: &NodeInvocation<'_>) -> Result<&Arc<dyn TargetAccessor>, HandlerExecutionError> {
        let target_type = invocation.record.target.target_type;
        self.collaborators
            .targets
            .get(target_type)
            .ok_or(HandlerExecutionError::NoAccessor(target_type))
    }

    async fn send_email(
        &self,
        config: &EmailConfig,
        invocation: &NodeInvocation<'_>,
    ) -> Result<NodeOutcome, HandlerExecutionError> {
        let accessor = self.accessor(invocation)?;
        let target_id = &invocation.record.target.id;

        let recipient = accessor
            .owner_email(target_id)
            .await?
            .ok_or(HandlerExecutionError::MissingRecipient)?;
        let target = accessor.snapshot(target_id).await?;

        let render_context = json!({
            "target": target,
            "user": { "email": recipient },
            "workflowMeta": {
                "id": invocation.workflow.id(),
                "name": invocation.workflow.definition.name,
                "executionId": invocation.record.id,
            },
            "trigger": invocation.context.trigger,
        });

        let rendered = self
            .collaborators
            .templates
            .render(&config.template_id, &render_context)
            .await?;
        let subject = config.subject.as_deref().unwrap_or(&rendered.subject);

        self.collaborators
            .mailer
            .deliver(&recipient, subject, &rendered.content)
            .await?;

        tracing::info!(
            execution_id = %invocation.record.id,
            template_id = %config.template_id,
            recipient = %recipient,
            "📧 Email sent"
        );
        Ok(NodeOutcome::Continue)
    }

    fn delay(&self, config: &DelayConfig) -> NodeOutcome {
        let now = self.clock.now();
        // Spans are range-checked when the workflow is compiled
        let span = config.span().unwrap_or_else(chrono::Duration::zero);
        let resume_at = now.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC);
        NodeOutcome::Suspend { resume_at }
    }

    async fn evaluate(
        &self,
        node_id: &str,
        predicate: &Predicate,
        invocation: &NodeInvocation<'_>,
    ) -> Result<NodeOutcome, HandlerExecutionError> {
        let accessor = self.accessor(invocation)?;
        let target = &invocation.record.target;

        let holds = match predicate {
            Predicate::StatusEquals { status } => match accessor.current_status(&target.id).await? {
                Some(current) => &current == status,
                None => {
                    tracing::warn!(node_id, entity = %target, "⚠️ Target has no status, taking 'no' branch");
                    false
                }
            },
            Predicate::StuckDuration {
                operator,
                threshold,
                unit,
            } => match accessor.status_changed_at(&target.id).await? {
                Some(changed_at) => {
                    let elapsed = unit.whole_units(self.clock.now() - changed_at);
                    operator.holds(elapsed, *threshold)
                }
                None => {
                    tracing::warn!(node_id, entity = %target, "⚠️ Target has no status change time, taking 'no' branch");
                    false
                }
            },
            Predicate::FieldEquals { field, value } => match accessor.get_field(&target.id, field).await? {
                Some(actual) if !actual.is_null() => loosely_equal(&actual, value),
                _ => {
                    tracing::warn!(node_id, entity = %target, field = %field, "⚠️ Field missing on target, taking 'no' branch");
                    false
                }
            },
        };

        tracing::debug!(node_id, entity = %target, holds, "🔀 Condition evaluated");
        Ok(NodeOutcome::Branch(holds))
    }

    async fn call_webhook(
        &self,
        config: &WebhookConfig,
        invocation: &NodeInvocation<'_>,
    ) -> Result<NodeOutcome, HandlerExecutionError> {
        let body = match &config.body {
            Some(body) => body.clone(),
            None => json!({
                "workflow": {
                    "id": invocation.workflow.id(),
                    "name": invocation.workflow.definition.name,
                },
                "execution": {
                    "id": invocation.record.id,
                    "triggerType": invocation.record.trigger_type,
                },
                "target": serde_json::to_value(&invocation.record.target)?,
                "trigger": invocation.context.trigger,
            }),
        };

        let response = self
            .collaborators
            .http
            .call(&config.url, config.method, &config.headers, Some(&body))
            .await?;

        if !response.is_success() {
            return Err(HandlerExecutionError::WebhookStatus {
                status: response.status_code,
            });
        }

        tracing::info!(
            execution_id = %invocation.record.id,
            url = %config.url,
            status = response.status_code,
            "🌐 Webhook delivered"
        );
        Ok(NodeOutcome::Continue)
    }
}

/// JSON equality, falling back to comparing string forms (`"5"` equals `5`)
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    let as_text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    as_text(actual) == as_text(expected)
}
