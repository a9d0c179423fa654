//! SQLite-backed target accessor and template renderer
//!
//! Host tables follow one shape:
//! `id TEXT, status TEXT, status_changed_at INTEGER (epoch ms), owner_email TEXT,
//! fields TEXT (JSON object), tags TEXT (JSON array)`.
//! Templates live in `email_templates(id, subject, body)`.

use crate::clock::{from_millis, to_millis};
use crate::collaborators::template::render_placeholders;
use crate::collaborators::{RenderedTemplate, TargetAccessor, TargetError, TemplateError, TemplateRenderer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

fn backend(e: sqlx::Error) -> TargetError {
    TargetError::Backend(e.to_string())
}

/// Reads and writes one host table of domain entities
#[derive(Debug, Clone)]
pub struct SqliteTargetAccessor {
    pool: SqlitePool,
    table: String,
}

impl SqliteTargetAccessor {
    /// `table` is interpolated into SQL, so only `[A-Za-z0-9_]` names are accepted
    pub fn new(pool: SqlitePool, table: &str) -> Result<Self, TargetError> {
        let valid = !table.is_empty()
            && !table.starts_with(|c: char| c.is_ascii_digit())
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(TargetError::Backend(format!("invalid table name '{table}'")));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Create the host table if the host has not already
    pub async fn ensure_table(&self) -> Result<(), TargetError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                status TEXT,
                status_changed_at INTEGER,
                owner_email TEXT,
                fields TEXT NOT NULL DEFAULT '{{}}',
                tags TEXT NOT NULL DEFAULT '[]'
            )
            "#,
            table = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(status, status_changed_at)",
            table = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn row(&self, id: &str) -> Result<SqliteRow, TargetError> {
        sqlx::query(&format!(
            "SELECT id, status, status_changed_at, owner_email, fields, tags FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| TargetError::NotFound(id.to_string()))
    }
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Value, TargetError> {
    let raw: Option<String> = row.try_get(column).map_err(backend)?;
    match raw {
        Some(text) if !text.is_empty() => serde_json::from_str(&text)
            .map_err(|e| TargetError::Backend(format!("column '{column}' is not valid JSON: {e}"))),
        _ => Ok(Value::Null),
    }
}

fn fields_of(row: &SqliteRow) -> Result<Map<String, Value>, TargetError> {
    match json_column(row, "fields")? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(TargetError::Backend(format!("fields must be a JSON object, got {other}"))),
    }
}

fn tags_of(row: &SqliteRow) -> Result<Vec<Value>, TargetError> {
    match json_column(row, "tags")? {
        Value::Array(tags) => Ok(tags),
        Value::Null => Ok(Vec::new()),
        other => Err(TargetError::Backend(format!("tags must be a JSON array, got {other}"))),
    }
}

fn changed_at_of(row: &SqliteRow) -> Result<Option<DateTime<Utc>>, TargetError> {
    let millis: Option<i64> = row.try_get("status_changed_at").map_err(backend)?;
    Ok(millis.and_then(from_millis))
}

#[async_trait]
impl TargetAccessor for SqliteTargetAccessor {
    async fn current_status(&self, id: &str) -> Result<Option<String>, TargetError> {
        let row = self.row(id).await?;
        row.try_get("status").map_err(backend)
    }

    async fn status_changed_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, TargetError> {
        changed_at_of(&self.row(id).await?)
    }

    async fn get_field(&self, id: &str, field: &str) -> Result<Option<Value>, TargetError> {
        let fields = fields_of(&self.row(id).await?)?;
        Ok(fields.get(field).filter(|v| !v.is_null()).cloned())
    }

    async fn set_field(&self, id: &str, field: &str, value: Value) -> Result<(), TargetError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let raw: Option<String> = sqlx::query_scalar(&format!("SELECT fields FROM {} WHERE id = ?", self.table))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| TargetError::NotFound(id.to_string()))?;

        let mut fields = match raw.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(Value::Object(map))) => map,
            Some(Ok(Value::Null)) | None => Map::new(),
            Some(Ok(other)) => return Err(TargetError::Backend(format!("fields must be a JSON object, got {other}"))),
            Some(Err(e)) => return Err(TargetError::Backend(e.to_string())),
        };
        fields.insert(field.to_string(), value);

        sqlx::query(&format!("UPDATE {} SET fields = ? WHERE id = ?", self.table))
            .bind(Value::Object(fields).to_string())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn tag(&self, id: &str, label: &str) -> Result<(), TargetError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let raw: Option<String> = sqlx::query_scalar(&format!("SELECT tags FROM {} WHERE id = ?", self.table))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| TargetError::NotFound(id.to_string()))?;

        let mut tags: Vec<String> = match raw.as_deref() {
            Some(text) if !text.is_empty() => serde_json::from_str(text).map_err(|e| TargetError::Backend(e.to_string()))?,
            _ => Vec::new(),
        };
        // Tagging twice is a no-op
        if tags.iter().any(|t| t == label) {
            return Ok(());
        }
        tags.push(label.to_string());

        sqlx::query(&format!("UPDATE {} SET tags = ? WHERE id = ?", self.table))
            .bind(json!(tags).to_string())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn owner_email(&self, id: &str) -> Result<Option<String>, TargetError> {
        let row = self.row(id).await?;
        let email: Option<String> = row.try_get("owner_email").map_err(backend)?;
        Ok(email.filter(|e| !e.trim().is_empty()))
    }

    async fn snapshot(&self, id: &str) -> Result<Value, TargetError> {
        let row = self.row(id).await?;
        let status: Option<String> = row.try_get("status").map_err(backend)?;
        let owner_email: Option<String> = row.try_get("owner_email").map_err(backend)?;

        Ok(json!({
            "id": id,
            "status": status,
            "statusChangedAt": changed_at_of(&row)?.map(|at| at.to_rfc3339()),
            "ownerEmail": owner_email,
            "fields": fields_of(&row)?,
            "tags": tags_of(&row)?,
        }))
    }

    async fn find_in_status_since(
        &self,
        status: &str,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<String>, TargetError> {
        sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE status = ? AND status_changed_at <= ? ORDER BY status_changed_at, id",
            self.table
        ))
        .bind(status)
        .bind(to_millis(changed_before))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }
}

/// Templates stored in the `email_templates` table
#[derive(Debug, Clone)]
pub struct SqliteTemplateRenderer {
    pool: SqlitePool,
}

impl SqliteTemplateRenderer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_templates (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert(&self, id: &str, subject: &str, body: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO email_templates (id, subject, body) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET subject = excluded.subject, body = excluded.body
            "#,
        )
        .bind(id)
        .bind(subject)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TemplateRenderer for SqliteTemplateRenderer {
    async fn render(&self, template_id: &str, context: &Value) -> Result<RenderedTemplate, TemplateError> {
        let row = sqlx::query("SELECT subject, body FROM email_templates WHERE id = ?")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TemplateError::Render(e.to_string()))?
            .ok_or_else(|| TemplateError::TemplateNotFound(template_id.to_string()))?;

        let subject: String = row.try_get("subject").map_err(|e| TemplateError::Render(e.to_string()))?;
        let body: String = row.try_get("body").map_err(|e| TemplateError::Render(e.to_string()))?;

        Ok(RenderedTemplate {
            subject: render_placeholders(&subject, context)?,
            content: render_placeholders(&body, context)?,
        })
    }
}
