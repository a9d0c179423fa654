//! Hot-reload workflow registry using ArcSwap
//!
//! Caches every compiled definition, active or not. Storage stays the source
//! of truth: several worker processes share one database, so dispatch, scan
//! and resume re-read it and swap fresh compilations into the cache. Another
//! process's create, edit or deactivation is seen on the next read.
//!
//! Resumption does not filter on the active flag, so deactivating a workflow
//! never strands its in-flight executions.

use crate::error::ConfigValidationError;
use crate::workflow::config::TriggerSpec;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{TriggerType, WorkflowDefinition};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free workflow registry
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: compiled workflow
    workflows: ArcSwap<HashMap<String, Arc<CompiledWorkflow>>>,
    storage: WorkflowStorage,
}

/// A definition that passed validation, ready to execute
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    pub trigger: TriggerSpec,
    pub graph: WorkflowGraph,
}

impl CompiledWorkflow {
    /// Validate trigger conditions and graph structure
    pub fn compile(definition: WorkflowDefinition) -> Result<Self, ConfigValidationError> {
        let trigger = TriggerSpec::parse(&definition)?;
        let graph = WorkflowGraph::compile(&definition)?;
        Ok(Self {
            definition,
            trigger,
            graph,
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn is_active(&self) -> bool {
        self.definition.active
    }
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    /// Load and compile every stored definition
    ///
    /// Definitions that fail validation are logged and left out; they never
    /// execute.
    pub async fn init_from_storage(&self) -> Result<()> {
        let loaded = self.refresh_from_storage().await?;
        tracing::info!("Initialized workflow registry with {} workflows", loaded);
        Ok(())
    }

    /// Replace the whole cache with what storage holds right now
    pub async fn refresh_from_storage(&self) -> Result<usize> {
        let stored = self.storage.load_all_workflows().await?;
        let mut compiled = HashMap::new();

        for (id, definition) in stored {
            match CompiledWorkflow::compile(definition) {
                Ok(workflow) => {
                    compiled.insert(id, Arc::new(workflow));
                }
                Err(e) => {
                    tracing::error!(workflow_id = %id, error = %e, "❌ Rejected invalid workflow definition");
                }
            }
        }

        let loaded = compiled.len();
        self.workflows.store(Arc::new(compiled));
        Ok(loaded)
    }

    /// Point-in-time set of active workflows started by `trigger_type`
    ///
    /// Falls back to the cached set when storage cannot be read.
    pub async fn load_active(&self, trigger_type: TriggerType) -> Vec<Arc<CompiledWorkflow>> {
        if let Err(e) = self.refresh_from_storage().await {
            tracing::warn!(error = %e, "⚠️ Could not refresh workflows from storage, using cached definitions");
        }
        self.active_for(trigger_type)
    }

    /// Current definition of one workflow, active or not
    ///
    /// `None` once the workflow is deleted from storage. Falls back to the
    /// cached definition when storage cannot be read.
    pub async fn load_current(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        match self.storage.get_workflow(workflow_id).await {
            Ok(Some(definition)) => match self.register(definition) {
                Ok(workflow) => Some(workflow),
                Err(e) => {
                    tracing::error!(workflow_id, error = %e, "❌ Stored workflow definition is invalid, using cached one");
                    self.get_workflow(workflow_id)
                }
            },
            Ok(None) => {
                self.remove_workflow(workflow_id);
                None
            }
            Err(e) => {
                tracing::warn!(workflow_id, error = %e, "⚠️ Could not read workflow from storage, using cached definition");
                self.get_workflow(workflow_id)
            }
        }
    }

    /// Re-read one workflow from storage and swap it in
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let definition = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        self.register(definition)?;
        tracing::info!("🔥 Hot-reloaded workflow: {}", workflow_id);

        Ok(())
    }

    /// Compile and insert a definition without touching storage
    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<CompiledWorkflow>, ConfigValidationError> {
        let compiled = Arc::new(CompiledWorkflow::compile(definition)?);
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(compiled.id().to_string(), Arc::clone(&compiled));
            next
        });
        Ok(compiled)
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Active workflows started by `trigger_type`, ordered by id
    pub fn active_for(&self, trigger_type: TriggerType) -> Vec<Arc<CompiledWorkflow>> {
        let mut matching: Vec<_> = self
            .workflows
            .load()
            .values()
            .filter(|w| w.is_active() && w.definition.trigger_type == trigger_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id().cmp(b.id()));
        matching
    }

    pub fn remove_workflow(&self, workflow_id: &str) {
        let mut removed = false;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(workflow_id).is_some();
            next
        });
        if removed {
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }
    }
}
