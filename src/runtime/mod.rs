//! Runtime Execution Engine
//!
//! This module runs workflows against domain entities. It handles:
//! - Node handlers with per-type timeouts
//! - Petgraph graph walking with durable suspension at delay nodes
//! - Continuation sweep for suspended executions
//! - Status-change dispatch and stuck-entity scanning
//! - Background jobs driving scan and sweep

// Individual node execution handlers
pub mod handlers;

// Graph executor driving records through the ledger
pub mod engine;

// Durable continuation tokens and the sweep that resumes them
pub mod continuation;

// status_changed trigger entry point
pub mod dispatcher;

// stuck_at_status trigger entry point
pub mod scanner;

// Interval jobs for scan and sweep
pub mod scheduler;

pub use continuation::{ContinuationScheduler, ContinuationStore, ContinuationToken, SweepReport};
pub use dispatcher::{DispatchReport, TriggerDispatcher};
pub use engine::{GraphExecutor, RunOutcome};
pub use handlers::{NodeHandlers, NodeOutcome, NodeTimeouts};
pub use scanner::{ScanReport, StuckEntityScanner};
pub use scheduler::BackgroundJobs;

use crate::clock::Clock;
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::ledger::ExecutionLedger;
use crate::workflow::registry::WorkflowRegistry;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

/// Every runtime component, wired to one database and one clock
#[derive(Debug, Clone)]
pub struct Engine {
    pub registry: Arc<WorkflowRegistry>,
    pub ledger: ExecutionLedger,
    pub executor: Arc<GraphExecutor>,
    pub continuations: Arc<ContinuationScheduler>,
    pub dispatcher: Arc<TriggerDispatcher>,
    pub scanner: Arc<StuckEntityScanner>,
}

impl Engine {
    /// Wire the components together. The schema must already exist
    /// (see [`crate::database::init_schema`]).
    pub fn assemble(
        pool: SqlitePool,
        registry: Arc<WorkflowRegistry>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ledger = ExecutionLedger::new(pool.clone(), Arc::clone(&clock));
        let store = ContinuationStore::new(pool, Arc::clone(&clock));
        let targets = collaborators.targets.clone();

        let handlers = NodeHandlers::new(collaborators, Arc::clone(&clock), config.timeouts);
        let executor = Arc::new(GraphExecutor::new(
            ledger.clone(),
            handlers,
            store.clone(),
            Arc::clone(&registry),
            Arc::clone(&clock),
        ));

        let continuations = Arc::new(ContinuationScheduler::new(
            store,
            Arc::clone(&executor),
            config.sweep_batch_size,
        ));
        let dispatcher = Arc::new(TriggerDispatcher::new(
            Arc::clone(&registry),
            ledger.clone(),
            Arc::clone(&executor),
        ));
        let scanner = Arc::new(StuckEntityScanner::new(
            Arc::clone(&registry),
            ledger.clone(),
            Arc::clone(&executor),
            targets,
            clock,
        ));

        Self {
            registry,
            ledger,
            executor,
            continuations,
            dispatcher,
            scanner,
        }
    }
}
