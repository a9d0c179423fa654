//! statusflow: lifecycle automation for domain entities
//!
//! Runs admin-authored workflows when an entity changes status or sits in a
//! status too long, with durable delays, an idempotent execution ledger and
//! hot-reloadable definitions.

// Core configuration and setup
pub mod config;

// Error taxonomy shared across layers
pub mod error;

// Wall clock abstraction
pub mod clock;

// SQLite pool and schema bootstrap
pub mod database;

// Workflow management layer - definitions, typed config, graph, storage, registry
pub mod workflow;

// Execution ledger - idempotent records and forward-only status transitions
pub mod ledger;

// Host-provided collaborators (mail, templates, HTTP, target access)
pub mod collaborators;

// Runtime execution engine - handlers, graph walking, continuations, triggers
pub mod runtime;

// HTTP API layer - workflow management, domain events, inspection
pub mod api;

// Server setup and initialization
pub mod server;

// Test doubles and an in-memory engine harness
pub mod testing;

// Re-export commonly used types for external consumers
pub use ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus};
pub use runtime::{Engine, RunOutcome};
pub use server::start_server;
pub use workflow::{TargetRef, TargetType, TriggerType, WorkflowDefinition};
