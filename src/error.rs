//! Error taxonomy for the automation engine
//!
//! Load-time graph problems, per-node handler failures, scheduling failures
//! on resumption and storage-level failures each get their own type so
//! callers can decide what is fatal and what is merely logged.

use crate::collaborators::{DeliveryError, NetworkError, TargetError, TemplateError};
use crate::workflow::types::{BranchLabel, NodeType, TargetRef, TargetType};
use std::time::Duration;
use thiserror::Error;

/// A workflow definition that cannot be executed.
///
/// Raised while compiling a definition; a workflow that fails here never
/// reaches the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("workflow has no trigger node")]
    MissingTrigger,

    #[error("workflow has {0} trigger nodes, expected exactly one")]
    MultipleTriggers(usize),

    #[error("connection references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    #[error("trigger node '{0}' must not have incoming connections")]
    TriggerHasIncoming(String),

    #[error(
        "condition node '{node_id}' needs exactly one 'yes' and one 'no' connection \
         (found yes={yes}, no={no}, next={next})"
    )]
    ConditionBranches {
        node_id: String,
        yes: usize,
        no: usize,
        next: usize,
    },

    #[error("node '{node_id}' has a '{label}' connection but only condition nodes branch")]
    UnexpectedBranch { node_id: String, label: BranchLabel },

    #[error("node '{0}' has more than one 'next' connection")]
    MultipleSuccessors(String),

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("node '{0}' is not reachable from the trigger node")]
    UnreachableNode(String),

    #[error("invalid config for node '{node_id}': {message}")]
    InvalidNodeConfig { node_id: String, message: String },

    #[error("invalid trigger conditions: {0}")]
    InvalidTriggerConditions(String),
}

/// Failure of a single node visit. Aborts the rest of that execution only.
#[derive(Debug, Error)]
pub enum HandlerExecutionError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("mail delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("target has no owner email address")]
    MissingRecipient,

    #[error("webhook request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("webhook returned non-success status {status}")]
    WebhookStatus { status: u16 },

    #[error("target access failed: {0}")]
    Target(#[from] TargetError),

    #[error("no accessor registered for target type '{0}'")]
    NoAccessor(TargetType),

    #[error("{node_type} handler timed out after {after:?}")]
    Timeout { node_type: NodeType, after: Duration },

    #[error("could not build payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A continuation token that can no longer be resumed.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("workflow '{0}' no longer exists")]
    WorkflowMissing(String),

    #[error("node '{node_id}' no longer exists in workflow '{workflow_id}'")]
    NodeMissing { workflow_id: String, node_id: String },

    #[error("context snapshot is unreadable: {0}")]
    Snapshot(String),

    #[error("could not persist continuation: {0}")]
    Persist(String),
}

/// Infrastructure failures of the engine itself (storage, serialization).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Starting one workflow for one trigger failed. Logged and skipped; never
/// surfaced to whoever emitted the domain event.
#[derive(Debug, Error)]
#[error("dispatch of workflow '{workflow_id}' for {target} failed: {source}")]
pub struct DispatchError {
    pub workflow_id: String,
    pub target: TargetRef,
    #[source]
    pub source: EngineError,
}
