//! Host-provided collaborators
//!
//! The engine never talks to mail servers, HTTP endpoints or domain tables
//! directly. Node handlers go through these traits, which the host wires up
//! (see [`Collaborators`]); test doubles live in [`crate::testing`].

pub mod http;
pub mod mail;
pub mod sqlite;
pub mod template;

use crate::workflow::config::HttpMethod;
use crate::workflow::types::TargetType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

pub use http::ReqwestHttpClient;
pub use mail::LogMailer;
pub use sqlite::{SqliteTargetAccessor, SqliteTemplateRenderer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("could not render template: {0}")]
    Render(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NetworkError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("target '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    Backend(String),
}

/// Subject and body produced by a [`TemplateRenderer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Render `template_id` against `context` (`{target, user, workflowMeta, trigger}`)
    async fn render(&self, template_id: &str, context: &Value) -> Result<RenderedTemplate, TemplateError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, recipient: &str, subject: &str, content: &str) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn call(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, NetworkError>;
}

/// Live attribute access for one target collection
///
/// Reads reflect the current state of the entity, not a snapshot taken when
/// the execution started.
#[async_trait]
pub trait TargetAccessor: Send + Sync {
    /// `Ok(None)` when the entity exists but has no status
    async fn current_status(&self, id: &str) -> Result<Option<String>, TargetError>;

    async fn status_changed_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, TargetError>;

    /// `Ok(None)` when the field is absent
    async fn get_field(&self, id: &str, field: &str) -> Result<Option<Value>, TargetError>;

    async fn set_field(&self, id: &str, field: &str, value: Value) -> Result<(), TargetError>;

    async fn tag(&self, id: &str, label: &str) -> Result<(), TargetError>;

    async fn owner_email(&self, id: &str) -> Result<Option<String>, TargetError>;

    /// JSON view of the entity for templates and webhook payloads
    async fn snapshot(&self, id: &str) -> Result<Value, TargetError>;

    /// Ids of entities in `status` whose last status change is at or before `changed_before`
    async fn find_in_status_since(
        &self,
        status: &str,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<String>, TargetError>;
}

/// Accessors keyed by target type
#[derive(Clone, Default)]
pub struct TargetAccessors {
    accessors: HashMap<TargetType, Arc<dyn TargetAccessor>>,
}

impl TargetAccessors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target_type: TargetType, accessor: Arc<dyn TargetAccessor>) -> Self {
        self.accessors.insert(target_type, accessor);
        self
    }

    pub fn get(&self, target_type: TargetType) -> Option<&Arc<dyn TargetAccessor>> {
        self.accessors.get(&target_type)
    }

    /// Registered target types, in a stable order
    pub fn target_types(&self) -> Vec<TargetType> {
        let mut types: Vec<_> = self.accessors.keys().copied().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for TargetAccessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetAccessors")
            .field("target_types", &self.target_types())
            .finish()
    }
}

/// Everything node handlers need from the host
#[derive(Clone)]
pub struct Collaborators {
    pub templates: Arc<dyn TemplateRenderer>,
    pub mailer: Arc<dyn Mailer>,
    pub http: Arc<dyn HttpClient>,
    pub targets: TargetAccessors,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}
