//! Test doubles and an in-memory engine harness
//!
//! Used by the unit tests and by the integration tests under `tests/`. Every
//! double records what it was asked to do and can be told to fail.

use crate::clock::Clock;
use crate::collaborators::{
    template::render_placeholders, Collaborators, DeliveryError, HttpClient, HttpResponse, Mailer, NetworkError,
    RenderedTemplate, TargetAccessor, TargetAccessors, TargetError, TemplateError, TemplateRenderer,
};
use crate::config::Config;
use crate::database;
use crate::runtime::Engine;
use crate::workflow::config::HttpMethod;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{TargetType, WorkflowDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Default for ManualClock {
    /// 2024-01-01T00:00:00Z
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub content: String,
}

/// Mailer that keeps every delivery in memory
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    failure: Mutex<Option<String>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        lock(&self.sent).clone()
    }

    /// Make every following delivery fail with `message`
    pub fn fail_with(&self, message: &str) {
        *lock(&self.failure) = Some(message.to_string());
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, recipient: &str, subject: &str, content: &str) -> Result<(), DeliveryError> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(DeliveryError(message));
        }
        lock(&self.sent).push(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}

/// In-memory templates rendered with `{{path}}` substitution
#[derive(Debug, Default)]
pub struct StaticTemplateRenderer {
    templates: Mutex<HashMap<String, (String, String)>>,
}

impl StaticTemplateRenderer {
    pub fn insert(&self, id: &str, subject: &str, body: &str) {
        lock(&self.templates).insert(id.to_string(), (subject.to_string(), body.to_string()));
    }
}

#[async_trait]
impl TemplateRenderer for StaticTemplateRenderer {
    async fn render(&self, template_id: &str, context: &Value) -> Result<RenderedTemplate, TemplateError> {
        let (subject, body) = lock(&self.templates)
            .get(template_id)
            .cloned()
            .ok_or_else(|| TemplateError::TemplateNotFound(template_id.to_string()))?;
        Ok(RenderedTemplate {
            subject: render_placeholders(&subject, context)?,
            content: render_placeholders(&body, context)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// HTTP client answering every call with a fixed status, optionally slowly
#[derive(Debug)]
pub struct RecordingHttpClient {
    requests: Mutex<Vec<RecordedRequest>>,
    status: Mutex<u16>,
    latency: Mutex<Option<std::time::Duration>>,
    failure: Mutex<Option<String>>,
}

impl Default for RecordingHttpClient {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status: Mutex::new(200),
            latency: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }
}

impl RecordingHttpClient {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn respond_with(&self, status: u16) {
        *lock(&self.status) = status;
    }

    /// Wait this long before answering
    pub fn delay_responses(&self, by: std::time::Duration) {
        *lock(&self.latency) = Some(by);
    }

    /// Fail every following call as if the host were unreachable
    pub fn fail_with(&self, message: &str) {
        *lock(&self.failure) = Some(message.to_string());
    }
}

#[async_trait]
impl HttpClient for RecordingHttpClient {
    async fn call(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, NetworkError> {
        lock(&self.requests).push(RecordedRequest {
            url: url.to_string(),
            method,
            headers: headers.clone(),
            body: body.cloned(),
        });
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = lock(&self.failure).clone() {
            return Err(NetworkError(message));
        }
        Ok(HttpResponse {
            status_code: *lock(&self.status),
            body: json!({}),
        })
    }
}

/// One in-memory domain entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeEntity {
    pub status: Option<String>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub owner_email: Option<String>,
    pub fields: Map<String, Value>,
    pub tags: Vec<String>,
}

/// Target accessor over a map of [`FakeEntity`]
#[derive(Debug, Default)]
pub struct InMemoryTargets {
    entities: Mutex<BTreeMap<String, FakeEntity>>,
}

impl InMemoryTargets {
    /// Insert an entity that entered `status` at `changed_at`
    pub fn insert(&self, id: &str, status: &str, changed_at: DateTime<Utc>, owner_email: &str) {
        lock(&self.entities).insert(
            id.to_string(),
            FakeEntity {
                status: Some(status.to_string()),
                status_changed_at: Some(changed_at),
                owner_email: Some(owner_email.to_string()).filter(|e| !e.is_empty()),
                ..FakeEntity::default()
            },
        );
    }

    pub fn set_status(&self, id: &str, status: &str, changed_at: DateTime<Utc>) {
        if let Some(entity) = lock(&self.entities).get_mut(id) {
            entity.status = Some(status.to_string());
            entity.status_changed_at = Some(changed_at);
        }
    }

    pub fn entity(&self, id: &str) -> Option<FakeEntity> {
        lock(&self.entities).get(id).cloned()
    }

    fn with_entity<T>(&self, id: &str, f: impl FnOnce(&mut FakeEntity) -> T) -> Result<T, TargetError> {
        lock(&self.entities)
            .get_mut(id)
            .map(f)
            .ok_or_else(|| TargetError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl TargetAccessor for InMemoryTargets {
    async fn current_status(&self, id: &str) -> Result<Option<String>, TargetError> {
        self.with_entity(id, |e| e.status.clone())
    }

    async fn status_changed_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, TargetError> {
        self.with_entity(id, |e| e.status_changed_at)
    }

    async fn get_field(&self, id: &str, field: &str) -> Result<Option<Value>, TargetError> {
        self.with_entity(id, |e| e.fields.get(field).cloned())
    }

    async fn set_field(&self, id: &str, field: &str, value: Value) -> Result<(), TargetError> {
        self.with_entity(id, |e| {
            e.fields.insert(field.to_string(), value);
        })
    }

    async fn tag(&self, id: &str, label: &str) -> Result<(), TargetError> {
        self.with_entity(id, |e| {
            if !e.tags.iter().any(|t| t == label) {
                e.tags.push(label.to_string());
            }
        })
    }

    async fn owner_email(&self, id: &str) -> Result<Option<String>, TargetError> {
        self.with_entity(id, |e| e.owner_email.clone())
    }

    async fn snapshot(&self, id: &str) -> Result<Value, TargetError> {
        self.with_entity(id, |e| {
            json!({
                "id": id,
                "status": e.status,
                "statusChangedAt": e.status_changed_at.map(|at| at.to_rfc3339()),
                "ownerEmail": e.owner_email,
                "fields": e.fields,
                "tags": e.tags,
            })
        })
    }

    async fn find_in_status_since(
        &self,
        status: &str,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<String>, TargetError> {
        Ok(lock(&self.entities)
            .iter()
            .filter(|(_, e)| {
                e.status.as_deref() == Some(status) && e.status_changed_at.is_some_and(|at| at <= changed_before)
            })
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// A fully wired engine over an in-memory database and recording doubles
pub struct Harness {
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    pub templates: Arc<StaticTemplateRenderer>,
    pub http: Arc<RecordingHttpClient>,
    pub applications: Arc<InMemoryTargets>,
    pub contracts: Arc<InMemoryTargets>,
    pub engine: Engine,
}

impl Harness {
    /// Validate and register a workflow, persisting it like the admin API does
    pub async fn install(&self, definition: serde_json::Value) -> WorkflowDefinition {
        let definition: WorkflowDefinition =
            serde_json::from_value(definition).unwrap_or_else(|e| panic!("invalid workflow JSON: {e}"));
        self.engine
            .registry
            .storage()
            .save_workflow(&definition)
            .await
            .unwrap_or_else(|e| panic!("saving workflow failed: {e}"));
        self.engine
            .registry
            .register(definition.clone())
            .unwrap_or_else(|e| panic!("workflow rejected: {e}"));
        definition
    }
}

/// Build a [`Harness`] with default timeouts
pub async fn harness() -> Harness {
    harness_with(Config::default().engine).await
}

/// Build a [`Harness`] with custom engine settings
pub async fn harness_with(engine_config: crate::config::EngineConfig) -> Harness {
    let pool = database::connect_in_memory()
        .await
        .unwrap_or_else(|e| panic!("in-memory database: {e}"));
    harness_on(pool, engine_config).await
}

/// Build a [`Harness`] over the database file at `path`
///
/// Several harnesses on one file behave like worker processes sharing a
/// database: each has its own registry, clock and doubles.
pub async fn harness_at(path: &str) -> Harness {
    let pool = database::connect(path)
        .await
        .unwrap_or_else(|e| panic!("database at {path}: {e}"));
    harness_on(pool, Config::default().engine).await
}

async fn harness_on(pool: SqlitePool, engine_config: crate::config::EngineConfig) -> Harness {
    database::init_schema(&pool)
        .await
        .unwrap_or_else(|e| panic!("schema: {e}"));

    let clock = Arc::new(ManualClock::default());
    let mailer = Arc::new(RecordingMailer::default());
    let templates = Arc::new(StaticTemplateRenderer::default());
    let http = Arc::new(RecordingHttpClient::default());
    let applications = Arc::new(InMemoryTargets::default());
    let contracts = Arc::new(InMemoryTargets::default());

    let collaborators = Collaborators {
        templates: templates.clone(),
        mailer: mailer.clone(),
        http: http.clone(),
        targets: TargetAccessors::new()
            .with(TargetType::Application, applications.clone())
            .with(TargetType::Contract, contracts.clone()),
    };

    let registry = Arc::new(WorkflowRegistry::new(WorkflowStorage::new(pool.clone())));
    let engine = Engine::assemble(pool.clone(), registry, collaborators, clock.clone(), &engine_config);

    Harness {
        pool,
        clock,
        mailer,
        templates,
        http,
        applications,
        contracts,
        engine,
    }
}
