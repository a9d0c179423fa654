//! Execution ledger
//!
//! One row per execution attempt. Idempotency for run-once workflows is a
//! partial UNIQUE index on (workflow, target, trigger) plus
//! `INSERT … ON CONFLICT DO NOTHING`: whichever worker inserts first owns the
//! execution, everyone else gets `started = false`. Status changes are
//! single-row conditional updates on the expected prior status, so two
//! workers can never both advance the same record, and completed/failed rows
//! are never touched again.

use crate::clock::{from_millis, to_millis, Clock};
use crate::error::EngineError;
use crate::workflow::types::{TargetRef, TargetType, TriggerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of an execution record
///
/// `pending → running → {suspended → running}* → completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Suspended => "suspended",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "suspended" => Ok(ExecutionStatus::Suspended),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One run of a workflow against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub target: TargetRef,
    pub trigger_type: TriggerType,
    pub status: ExecutionStatus,
    pub run_once: bool,
    /// Node that failed, for operator inspection
    pub failed_node_id: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Result of [`ExecutionLedger::try_start`]
#[derive(Debug, Clone)]
pub struct TryStart {
    pub record: ExecutionRecord,
    /// `false` when another attempt already owns this run-once key
    pub started: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionLedger {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

const SELECT_COLUMNS: &str = "id, workflow_id, target_type, target_id, trigger_type, status, run_once, \
     failed_node_id, error, started_at, finished_at, updated_at";

impl ExecutionLedger {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn init_schema(pool: &SqlitePool) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                status TEXT NOT NULL,
                run_once INTEGER NOT NULL,
                failed_node_id TEXT,
                error TEXT,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // The idempotency guarantee lives here, not in application code
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_run_once
            ON workflow_executions(workflow_id, target_type, target_id, trigger_type)
            WHERE run_once = 1
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_target
            ON workflow_executions(target_type, target_id)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Create a `pending` record unless a run-once record already exists for the key
    pub async fn try_start(
        &self,
        workflow_id: &str,
        target: &TargetRef,
        trigger_type: TriggerType,
        run_once: bool,
    ) -> Result<TryStart, EngineError> {
        let now = self.clock.now();
        let id = Uuid::new_v4().to_string();

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, target_type, target_id, trigger_type, status, run_once, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(workflow_id)
        .bind(target.target_type.as_str())
        .bind(&target.id)
        .bind(trigger_type.as_str())
        .bind(ExecutionStatus::Pending.as_str())
        .bind(run_once)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            tracing::debug!(execution_id = %id, workflow_id, target = %target, "Execution record created");
            return Ok(TryStart {
                record: ExecutionRecord {
                    id,
                    workflow_id: workflow_id.to_string(),
                    target: target.clone(),
                    trigger_type,
                    status: ExecutionStatus::Pending,
                    run_once,
                    failed_node_id: None,
                    error: None,
                    started_at: now,
                    finished_at: None,
                    updated_at: now,
                },
                started: true,
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_executions \
             WHERE workflow_id = ? AND target_type = ? AND target_id = ? AND trigger_type = ? AND run_once = 1"
        ))
        .bind(workflow_id)
        .bind(target.target_type.as_str())
        .bind(&target.id)
        .bind(trigger_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        let existing = record_from_row(&row)?;
        tracing::debug!(
            execution_id = %existing.id,
            workflow_id,
            target = %target,
            "Run-once execution already recorded, not starting again"
        );
        Ok(TryStart {
            record: existing,
            started: false,
        })
    }

    /// pending|suspended → running
    pub async fn mark_running(&self, execution_id: &str) -> Result<bool, EngineError> {
        self.transition(
            execution_id,
            ExecutionStatus::Running,
            &[ExecutionStatus::Pending, ExecutionStatus::Suspended],
            None,
        )
        .await
    }

    /// running → suspended
    pub async fn mark_suspended(&self, execution_id: &str) -> Result<bool, EngineError> {
        self.transition(execution_id, ExecutionStatus::Suspended, &[ExecutionStatus::Running], None)
            .await
    }

    /// running → suspended, on the caller's connection so it can share a
    /// transaction with the continuation insert
    pub async fn mark_suspended_in(&self, conn: &mut SqliteConnection, execution_id: &str) -> Result<bool, EngineError> {
        self.transition_on(conn, execution_id, ExecutionStatus::Suspended, &[ExecutionStatus::Running], None)
            .await
    }

    /// running → completed
    pub async fn mark_completed(&self, execution_id: &str) -> Result<bool, EngineError> {
        self.transition(execution_id, ExecutionStatus::Completed, &[ExecutionStatus::Running], None)
            .await
    }

    /// any non-terminal status → failed, recording the offending node
    pub async fn mark_failed(&self, execution_id: &str, node_id: &str, error: &str) -> Result<bool, EngineError> {
        self.transition(
            execution_id,
            ExecutionStatus::Failed,
            &[ExecutionStatus::Pending, ExecutionStatus::Running, ExecutionStatus::Suspended],
            Some((node_id, error)),
        )
        .await
    }

    /// Conditional single-row update. `false` means the record was not in any
    /// of the `expected` statuses, i.e. someone else is handling it.
    async fn transition(
        &self,
        execution_id: &str,
        to: ExecutionStatus,
        expected: &[ExecutionStatus],
        failure: Option<(&str, &str)>,
    ) -> Result<bool, EngineError> {
        let mut conn = self.pool.acquire().await?;
        self.transition_on(&mut conn, execution_id, to, expected, failure).await
    }

    async fn transition_on(
        &self,
        conn: &mut SqliteConnection,
        execution_id: &str,
        to: ExecutionStatus,
        expected: &[ExecutionStatus],
        failure: Option<(&str, &str)>,
    ) -> Result<bool, EngineError> {
        let now = to_millis(self.clock.now());
        let finished_at = to.is_terminal().then_some(now);
        let allowed = expected
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let (failed_node_id, error) = match failure {
            Some((node, err)) => (Some(node), Some(err)),
            None => (None, None),
        };

        let updated = sqlx::query(&format!(
            r#"
            UPDATE workflow_executions
            SET status = ?,
                updated_at = ?,
                finished_at = COALESCE(?, finished_at),
                failed_node_id = COALESCE(?, failed_node_id),
                error = COALESCE(?, error)
            WHERE id = ? AND status IN ({allowed})
            "#
        ))
        .bind(to.as_str())
        .bind(now)
        .bind(finished_at)
        .bind(failed_node_id)
        .bind(error)
        .bind(execution_id)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            == 1;

        if !updated {
            tracing::debug!(execution_id, to = %to, "Status transition skipped, record not in expected state");
        }
        Ok(updated)
    }

    pub async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, EngineError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM workflow_executions WHERE id = ?"))
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Every record for one target, oldest first
    pub async fn list_for_target(&self, target: &TargetRef) -> Result<Vec<ExecutionRecord>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_executions \
             WHERE target_type = ? AND target_id = ? ORDER BY started_at, id"
        ))
        .bind(target.target_type.as_str())
        .bind(&target.id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ExecutionRecord, EngineError> {
    let corrupt = |what: String| EngineError::CorruptRow(what);
    let timestamp = |column: &str| -> Result<DateTime<Utc>, EngineError> {
        let millis: i64 = row.try_get(column)?;
        from_millis(millis).ok_or_else(|| corrupt(format!("{column} out of range: {millis}")))
    };

    let target_type: String = row.try_get("target_type")?;
    let trigger_type: String = row.try_get("trigger_type")?;
    let status: String = row.try_get("status")?;
    let finished_at: Option<i64> = row.try_get("finished_at")?;

    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        target: TargetRef {
            target_type: TargetType::from_str(&target_type).map_err(corrupt)?,
            id: row.try_get("target_id")?,
        },
        trigger_type: TriggerType::from_str(&trigger_type).map_err(corrupt)?,
        status: ExecutionStatus::from_str(&status).map_err(corrupt)?,
        run_once: row.try_get("run_once")?,
        failed_node_id: row.try_get("failed_node_id")?,
        error: row.try_get("error")?,
        started_at: timestamp("started_at")?,
        finished_at: finished_at
            .map(|ms| from_millis(ms).ok_or_else(|| corrupt(format!("finished_at out of range: {ms}"))))
            .transpose()?,
        updated_at: timestamp("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::database;

    async fn ledger() -> ExecutionLedger {
        let pool = database::connect_in_memory().await.unwrap();
        ExecutionLedger::init_schema(&pool).await.unwrap();
        ExecutionLedger::new(pool, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn run_once_key_starts_only_once() {
        let ledger = ledger().await;
        let target = TargetRef::application("A-1");

        let first = ledger.try_start("wf", &target, TriggerType::StuckAtStatus, true).await.unwrap();
        let second = ledger.try_start("wf", &target, TriggerType::StuckAtStatus, true).await.unwrap();

        assert!(first.started);
        assert!(!second.started);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(ledger.list_for_target(&target).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeatable_workflows_get_a_record_per_trigger() {
        let ledger = ledger().await;
        let target = TargetRef::contract("C-9");

        assert!(ledger.try_start("wf", &target, TriggerType::StatusChanged, false).await.unwrap().started);
        assert!(ledger.try_start("wf", &target, TriggerType::StatusChanged, false).await.unwrap().started);
        assert_eq!(ledger.list_for_target(&target).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let ledger = ledger().await;
        let a = TargetRef::application("1");
        let b = TargetRef::application("2");

        assert!(ledger.try_start("wf", &a, TriggerType::StuckAtStatus, true).await.unwrap().started);
        assert!(ledger.try_start("wf", &b, TriggerType::StuckAtStatus, true).await.unwrap().started);
        assert!(ledger.try_start("other", &a, TriggerType::StuckAtStatus, true).await.unwrap().started);
        assert!(ledger.try_start("wf", &a, TriggerType::StatusChanged, true).await.unwrap().started);
    }

    #[tokio::test]
    async fn forward_only_transitions() {
        let ledger = ledger().await;
        let id = ledger
            .try_start("wf", &TargetRef::application("1"), TriggerType::StatusChanged, false)
            .await
            .unwrap()
            .record
            .id;

        assert!(!ledger.mark_suspended(&id).await.unwrap(), "pending cannot suspend");
        assert!(ledger.mark_running(&id).await.unwrap());
        assert!(!ledger.mark_running(&id).await.unwrap(), "second worker must lose");
        assert!(ledger.mark_suspended(&id).await.unwrap());
        assert!(ledger.mark_running(&id).await.unwrap());
        assert!(ledger.mark_completed(&id).await.unwrap());

        let record = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn terminal_records_never_change() {
        let ledger = ledger().await;
        let target = TargetRef::application("1");
        let done = ledger.try_start("wf", &target, TriggerType::StatusChanged, false).await.unwrap().record.id;
        ledger.mark_running(&done).await.unwrap();
        ledger.mark_completed(&done).await.unwrap();

        let failed = ledger.try_start("wf", &target, TriggerType::StatusChanged, false).await.unwrap().record.id;
        ledger.mark_running(&failed).await.unwrap();
        assert!(ledger.mark_failed(&failed, "email-1", "smtp down").await.unwrap());

        for id in [&done, &failed] {
            assert!(!ledger.mark_running(id).await.unwrap());
            assert!(!ledger.mark_suspended(id).await.unwrap());
            assert!(!ledger.mark_completed(id).await.unwrap());
            assert!(!ledger.mark_failed(id, "x", "y").await.unwrap());
        }

        assert_eq!(ledger.get(&done).await.unwrap().unwrap().status, ExecutionStatus::Completed);
        let failed = ledger.get(&failed).await.unwrap().unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.failed_node_id.as_deref(), Some("email-1"));
        assert_eq!(failed.error.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn concurrent_try_start_yields_one_winner() {
        let ledger = ledger().await;
        let target = TargetRef::application("race");

        let attempts = (0..8).map(|_| {
            let ledger = ledger.clone();
            let target = target.clone();
            tokio::spawn(async move {
                ledger
                    .try_start("wf", &target, TriggerType::StuckAtStatus, true)
                    .await
                    .unwrap()
                    .started
            })
        });

        let mut winners = 0;
        for handle in attempts.collect::<Vec<_>>() {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
