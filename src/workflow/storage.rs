//! SQLite persistence layer for workflow definitions
//!
//! Definitions are stored as JSON alongside indexed lookup columns (trigger
//! type, active flag) so admin tooling can list and toggle them cheaply.

use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the workflows table. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_trigger_active
            ON workflows(trigger_type, active)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a definition
    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, trigger_type, active, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                trigger_type = excluded.trigger_type,
                active = excluded.active,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.trigger_type.as_str())
        .bind(workflow.active)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// List all workflows with basic metadata
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, trigger_type, active, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                trigger_type: row.get("trigger_type"),
                active: row.get("active"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Load all definitions, active or not, keyed by id
    ///
    /// Rows whose JSON no longer parses are logged and skipped so one bad
    /// definition cannot keep the rest from loading.
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<WorkflowDefinition>(&definition_json) {
                Ok(workflow) => {
                    workflows.insert(id, workflow);
                }
                Err(e) => tracing::error!(workflow_id = %id, error = %e, "Stored workflow definition is unreadable"),
            }
        }

        Ok(workflows)
    }

    /// Flip the active flag. Returns `false` if the workflow does not exist.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let Some(mut workflow) = self.get_workflow(id).await? else {
            return Ok(false);
        };
        workflow.active = active;
        self.save_workflow(&workflow).await?;
        Ok(true)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Basic workflow metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub trigger_type: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}
