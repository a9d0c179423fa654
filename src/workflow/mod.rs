//! Workflow Management Layer
//!
//! - Type definitions (WorkflowDefinition, Node, Connection)
//! - Typed node/trigger configuration parsed at load time
//! - Graph compilation and structural validation
//! - SQLite persistence with sqlx
//! - Lock-free hot-reload registry using ArcSwap

pub mod types;

pub mod config;

pub mod graph;

pub mod storage;

pub mod registry;

pub use config::{NodeKind, Predicate, TriggerSpec};
pub use graph::{CompiledNode, WorkflowGraph};
pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use storage::WorkflowStorage;
pub use types::{
    BranchLabel, Connection, ExecutionContext, Node, NodeType, TargetRef, TargetType, TriggerType,
    WorkflowDefinition,
};
