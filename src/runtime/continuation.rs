//! Durable continuations for suspended executions
//!
//! A delay node never sleeps. The executor persists a token naming the node
//! to resume at, when, and the serialized context; the sweep later picks up
//! due tokens and hands them back to the executor. Tokens survive process
//! restarts and overdue tokens are resumed on the first sweep after startup.
//!
//! Suspending is one transaction: the record moves to `suspended` and its
//! token is inserted together, so a crash cannot leave a suspended record
//! with nothing to resume it. `resume_at` is stored rounded up to the
//! millisecond, so a token never comes due before its delay has elapsed.
//!
//! Claiming is a single-row `DELETE`: only the sweeper whose delete affects a
//! row resumes the execution, so concurrent sweepers never double-resume.

use crate::clock::{from_millis, to_millis, to_millis_ceil, Clock};
use crate::error::EngineError;
use crate::ledger::ExecutionLedger;
use crate::runtime::engine::{GraphExecutor, RunOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

/// Durable marker for one suspended execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuationToken {
    pub id: String,
    pub execution_id: String,
    /// Successor of the delay node that suspended
    pub resume_at_node_id: String,
    pub resume_at: DateTime<Utc>,
    /// Serialized `ExecutionContext`
    pub context_snapshot: Value,
    pub created_at: DateTime<Utc>,
}

/// `continuation_tokens` table access
#[derive(Debug, Clone)]
pub struct ContinuationStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ContinuationStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn init_schema(pool: &SqlitePool) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS continuation_tokens (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                resume_at_node_id TEXT NOT NULL,
                resume_at INTEGER NOT NULL,
                context_snapshot TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_continuations_due
            ON continuation_tokens(resume_at)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Mark the record suspended and persist its token in one transaction
    ///
    /// `Ok(None)` when the record is no longer `running`; nothing is written.
    pub async fn schedule(
        &self,
        ledger: &ExecutionLedger,
        execution_id: &str,
        resume_at_node_id: &str,
        resume_at: DateTime<Utc>,
        context_snapshot: Value,
    ) -> Result<Option<ContinuationToken>, EngineError> {
        let token = ContinuationToken {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            resume_at_node_id: resume_at_node_id.to_string(),
            resume_at,
            context_snapshot,
            created_at: self.clock.now(),
        };
        let snapshot = serde_json::to_string(&token.context_snapshot)?;

        let mut tx = self.pool.begin().await?;
        if !ledger.mark_suspended_in(&mut tx, execution_id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO continuation_tokens
                (id, execution_id, resume_at_node_id, resume_at, context_snapshot, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.id)
        .bind(&token.execution_id)
        .bind(&token.resume_at_node_id)
        .bind(to_millis_ceil(token.resume_at))
        .bind(snapshot)
        .bind(to_millis(token.created_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(
            execution_id,
            resume_at_node_id,
            resume_at = %resume_at,
            "⏸️ Continuation scheduled"
        );
        Ok(Some(token))
    }

    /// Tokens with `resume_at <= now`, oldest first
    pub async fn due(&self, limit: u32) -> Result<Vec<ContinuationToken>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, resume_at_node_id, resume_at, context_snapshot, created_at
            FROM continuation_tokens
            WHERE resume_at <= ?
            ORDER BY resume_at, created_at
            LIMIT ?
            "#,
        )
        .bind(to_millis(self.clock.now()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(token_from_row).collect()
    }

    /// Remove the token. `true` means this caller owns the resumption.
    pub async fn claim(&self, token_id: &str) -> Result<bool, EngineError> {
        let deleted = sqlx::query("DELETE FROM continuation_tokens WHERE id = ?")
            .bind(token_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted == 1)
    }

    /// Outstanding tokens for one execution
    pub async fn for_execution(&self, execution_id: &str) -> Result<Vec<ContinuationToken>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, resume_at_node_id, resume_at, context_snapshot, created_at
            FROM continuation_tokens
            WHERE execution_id = ?
            ORDER BY resume_at
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(token_from_row).collect()
    }
}

fn token_from_row(row: &SqliteRow) -> Result<ContinuationToken, EngineError> {
    let timestamp = |column: &str| -> Result<DateTime<Utc>, EngineError> {
        let millis: i64 = row.try_get(column)?;
        from_millis(millis).ok_or_else(|| EngineError::CorruptRow(format!("{column} out of range: {millis}")))
    };
    let snapshot: String = row.try_get("context_snapshot")?;

    Ok(ContinuationToken {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        resume_at_node_id: row.try_get("resume_at_node_id")?,
        resume_at: timestamp("resume_at")?,
        // Unparsable snapshots are reported by the executor as a scheduling failure
        context_snapshot: serde_json::from_str(&snapshot).unwrap_or(Value::String(snapshot)),
        created_at: timestamp("created_at")?,
    })
}

/// Tally of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub due: usize,
    pub claimed: usize,
    pub completed: usize,
    pub suspended: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Persists continuations and resumes them when due
#[derive(Debug)]
pub struct ContinuationScheduler {
    store: ContinuationStore,
    executor: Arc<GraphExecutor>,
    batch_size: u32,
}

impl ContinuationScheduler {
    pub fn new(store: ContinuationStore, executor: Arc<GraphExecutor>, batch_size: u32) -> Self {
        Self {
            store,
            executor,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &ContinuationStore {
        &self.store
    }

    /// Resume every due token, up to one batch
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let due = self.store.due(self.batch_size).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };

        for token in due {
            match self.store.claim(&token.id).await {
                Ok(true) => report.claimed += 1,
                Ok(false) => {
                    tracing::debug!(token_id = %token.id, "Continuation already claimed by another sweeper");
                    continue;
                }
                Err(e) => {
                    tracing::error!(token_id = %token.id, error = %e, "❌ Failed to claim continuation");
                    report.failed += 1;
                    continue;
                }
            }

            match self.executor.resume(&token).await {
                Ok(RunOutcome::Completed) => report.completed += 1,
                Ok(RunOutcome::Suspended { .. }) => report.suspended += 1,
                Ok(RunOutcome::Failed { .. }) => report.failed += 1,
                Ok(RunOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    // Token is already gone; the record stays suspended for an operator to inspect
                    tracing::error!(
                        execution_id = %token.execution_id,
                        token_id = %token.id,
                        error = %e,
                        "❌ Resumption failed after claiming continuation"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            tracing::info!(
                due = report.due,
                claimed = report.claimed,
                completed = report.completed,
                suspended = report.suspended,
                failed = report.failed,
                "⏰ Continuation sweep finished"
            );
        }
        Ok(report)
    }
}
