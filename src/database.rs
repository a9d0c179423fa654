//! SQLite pool setup and schema bootstrap
//!
//! One database file holds workflow definitions, the execution ledger and
//! continuation tokens. Worker processes sharing the file share the ledger's
//! uniqueness guarantees.

use crate::ledger::ExecutionLedger;
use crate::runtime::continuation::ContinuationStore;
use crate::workflow::storage::WorkflowStorage;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Open (creating if missing) the database file at `path`
pub async fn connect(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e))?;
        }
    }

    tracing::info!("🗄️ Opening database: {}", path);

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePool::connect_with(options).await?;

    Ok(pool)
}

/// Private in-memory database on a single connection
///
/// Every connection to `sqlite::memory:` gets its own database, so the pool
/// is capped at one connection.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Create every engine table. Safe to call multiple times.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    WorkflowStorage::new(pool.clone()).init_schema().await?;
    ExecutionLedger::init_schema(pool).await?;
    ContinuationStore::init_schema(pool).await?;
    Ok(())
}
