//! Typed node and trigger configuration
//!
//! Node `config` objects and definition `triggerConditions` arrive as
//! free-form JSON. They are parsed here into closed, typed variants once, at
//! compile time. Unknown keys and missing required keys are rejected.

use crate::error::ConfigValidationError;
use crate::workflow::types::{Node, NodeType, TargetType, TriggerType, WorkflowDefinition};
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Typed instruction for one node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Trigger,
    Email(EmailConfig),
    Delay(DelayConfig),
    Condition(Predicate),
    Webhook(WebhookConfig),
    MutateTarget(MutateTargetConfig),
    TagTarget(TagTargetConfig),
}

impl NodeKind {
    /// Parse and validate the config of `node`
    pub fn parse(node: &Node) -> Result<Self, ConfigValidationError> {
        let kind = match node.node_type {
            // Trigger config is trigger-type-specific and not interpreted by the graph
            NodeType::Trigger => NodeKind::Trigger,
            NodeType::Email => {
                let config: EmailConfig = parse_config(node)?;
                if config.template_id.trim().is_empty() {
                    return Err(invalid(node, "templateId must not be empty"));
                }
                NodeKind::Email(config)
            }
            NodeType::Delay => {
                let config: DelayConfig = parse_config(node)?;
                if config.duration == 0 {
                    return Err(invalid(node, "duration must be greater than zero"));
                }
                if config.span().is_none() {
                    return Err(invalid(node, "duration is out of range"));
                }
                NodeKind::Delay(config)
            }
            NodeType::Condition => {
                let config: ConditionConfig = parse_config(node)?;
                NodeKind::Condition(config.into_predicate().map_err(|msg| invalid(node, &msg))?)
            }
            NodeType::Webhook => {
                let config: WebhookConfig = parse_config(node)?;
                reqwest::Url::parse(&config.url)
                    .map_err(|e| invalid(node, &format!("invalid url '{}': {}", config.url, e)))?;
                NodeKind::Webhook(config)
            }
            NodeType::MutateTarget => {
                let config: MutateTargetConfig = parse_config(node)?;
                if config.field.trim().is_empty() {
                    return Err(invalid(node, "field must not be empty"));
                }
                NodeKind::MutateTarget(config)
            }
            NodeType::TagTarget => {
                let config: TagTargetConfig = parse_config(node)?;
                if config.value.trim().is_empty() {
                    return Err(invalid(node, "value must not be empty"));
                }
                NodeKind::TagTarget(config)
            }
        };

        Ok(kind)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Trigger => NodeType::Trigger,
            NodeKind::Email(_) => NodeType::Email,
            NodeKind::Delay(_) => NodeType::Delay,
            NodeKind::Condition(_) => NodeType::Condition,
            NodeKind::Webhook(_) => NodeType::Webhook,
            NodeKind::MutateTarget(_) => NodeType::MutateTarget,
            NodeKind::TagTarget(_) => NodeType::TagTarget,
        }
    }
}

fn parse_config<T: DeserializeOwned>(node: &Node) -> Result<T, ConfigValidationError> {
    let raw = if node.config.is_null() {
        Value::Object(Map::new())
    } else {
        node.config.clone()
    };
    serde_json::from_value(raw).map_err(|e| invalid(node, &e.to_string()))
}

fn invalid(node: &Node, message: &str) -> ConfigValidationError {
    ConfigValidationError::InvalidNodeConfig {
        node_id: node.id.clone(),
        message: message.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmailConfig {
    pub template_id: String,
    /// Replaces the rendered subject when set
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DelayConfig {
    pub duration: u64,
    pub unit: DurationUnit,
}

impl DelayConfig {
    pub fn span(&self) -> Option<Duration> {
        self.unit.span(self.duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    #[serde(alias = "minute")]
    Minutes,
    #[serde(alias = "hour")]
    Hours,
    #[serde(alias = "day")]
    Days,
}

impl DurationUnit {
    /// `amount` of this unit as a duration, `None` on overflow
    pub fn span(&self, amount: u64) -> Option<Duration> {
        let amount = i64::try_from(amount).ok()?;
        match self {
            DurationUnit::Minutes => Duration::try_minutes(amount),
            DurationUnit::Hours => Duration::try_hours(amount),
            DurationUnit::Days => Duration::try_days(amount),
        }
    }

    /// Whole units contained in `elapsed`, rounded down
    pub fn whole_units(&self, elapsed: Duration) -> i64 {
        match self {
            DurationUnit::Minutes => elapsed.num_minutes(),
            DurationUnit::Hours => elapsed.num_hours(),
            DurationUnit::Days => elapsed.num_days(),
        }
    }
}

/// Raw condition node config as authored
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConditionConfig {
    condition_type: ConditionType,
    condition_value: Value,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    operator: Option<Comparison>,
    #[serde(default)]
    unit: Option<DurationUnit>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConditionType {
    StatusEquals,
    StuckDuration,
    FieldEquals,
}

impl ConditionConfig {
    fn into_predicate(self) -> Result<Predicate, String> {
        match self.condition_type {
            ConditionType::StatusEquals => {
                let status = self
                    .condition_value
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or("status_equals needs a non-empty string conditionValue")?;
                Ok(Predicate::StatusEquals {
                    status: status.to_string(),
                })
            }
            ConditionType::StuckDuration => {
                let threshold = match &self.condition_value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .filter(|v| *v >= 0)
                .ok_or("stuck_duration needs a non-negative integer conditionValue")?;
                Ok(Predicate::StuckDuration {
                    operator: self.operator.unwrap_or(Comparison::Gte),
                    threshold,
                    unit: self.unit.unwrap_or(DurationUnit::Days),
                })
            }
            ConditionType::FieldEquals => {
                let field = self
                    .field
                    .filter(|f| !f.trim().is_empty())
                    .ok_or("field_equals needs a 'field'")?;
                Ok(Predicate::FieldEquals {
                    field,
                    value: self.condition_value,
                })
            }
        }
    }
}

/// The closed set of condition evaluators
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Target's current status equals `status`
    StatusEquals { status: String },
    /// Whole `unit`s since the last status change compared against `threshold`
    StuckDuration {
        operator: Comparison,
        threshold: i64,
        unit: DurationUnit,
    },
    /// A custom field on the target equals `value`
    FieldEquals { field: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "==", alias = "=")]
    Eq,
}

impl Comparison {
    pub fn holds(&self, actual: i64, expected: i64) -> bool {
        match self {
            Comparison::Gte => actual >= expected,
            Comparison::Gt => actual > expected,
            Comparison::Lte => actual <= expected,
            Comparison::Lt => actual < expected,
            Comparison::Eq => actual == expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Fixed JSON body. When absent the engine sends a description of the
    /// execution (workflow, execution id, target, trigger data).
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[serde(alias = "get")]
    Get,
    #[default]
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MutateTargetConfig {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TagTargetConfig {
    /// Label to attach
    #[serde(alias = "tag")]
    pub value: String,
}

/// Status filter in a trigger condition. Absent, null, `*` and `any` are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusPattern {
    Any,
    Exact(String),
}

impl StatusPattern {
    fn from_condition(raw: Option<String>) -> Self {
        match raw {
            None => StatusPattern::Any,
            Some(s) if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("any") => StatusPattern::Any,
            Some(s) => StatusPattern::Exact(s),
        }
    }

    pub fn matches(&self, status: &str) -> bool {
        match self {
            StatusPattern::Any => true,
            StatusPattern::Exact(expected) => expected == status,
        }
    }
}

/// Compiled trigger conditions
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    StatusChanged {
        /// `None` matches any target type
        target_type: Option<TargetType>,
        from: StatusPattern,
        to: StatusPattern,
        run_once: bool,
    },
    StuckAtStatus {
        /// `None` scans every registered target collection
        target_type: Option<TargetType>,
        status: String,
        threshold: Duration,
        run_once: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StatusChangedConditions {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    target_type: Option<TargetType>,
    #[serde(default)]
    run_once: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StuckConditions {
    stuck_status: String,
    duration: u64,
    #[serde(default = "default_stuck_unit")]
    unit: DurationUnit,
    #[serde(default)]
    target_type: Option<TargetType>,
    #[serde(default)]
    run_once: bool,
}

fn default_stuck_unit() -> DurationUnit {
    DurationUnit::Days
}

impl TriggerSpec {
    /// Parse the definition's trigger conditions according to its trigger type
    pub fn parse(definition: &WorkflowDefinition) -> Result<Self, ConfigValidationError> {
        let raw = Value::Object(definition.trigger_conditions.clone());
        let bad = |e: serde_json::Error| ConfigValidationError::InvalidTriggerConditions(e.to_string());

        match definition.trigger_type {
            TriggerType::StatusChanged => {
                let c: StatusChangedConditions = serde_json::from_value(raw).map_err(bad)?;
                Ok(TriggerSpec::StatusChanged {
                    target_type: c.target_type,
                    from: StatusPattern::from_condition(c.from),
                    to: StatusPattern::from_condition(c.to),
                    run_once: c.run_once,
                })
            }
            TriggerType::StuckAtStatus => {
                let c: StuckConditions = serde_json::from_value(raw).map_err(bad)?;
                if c.stuck_status.trim().is_empty() {
                    return Err(ConfigValidationError::InvalidTriggerConditions(
                        "stuckStatus must not be empty".to_string(),
                    ));
                }
                let threshold = c.unit.span(c.duration).ok_or_else(|| {
                    ConfigValidationError::InvalidTriggerConditions("duration is out of range".to_string())
                })?;
                Ok(TriggerSpec::StuckAtStatus {
                    target_type: c.target_type,
                    status: c.stuck_status,
                    threshold,
                    run_once: c.run_once,
                })
            }
        }
    }

    pub fn run_once(&self) -> bool {
        match self {
            TriggerSpec::StatusChanged { run_once, .. } | TriggerSpec::StuckAtStatus { run_once, .. } => *run_once,
        }
    }

    /// Does a `from → to` transition of a `target_type` entity fire this trigger?
    pub fn matches_transition(&self, target_type: TargetType, from_status: &str, to_status: &str) -> bool {
        match self {
            TriggerSpec::StatusChanged {
                target_type: wanted,
                from,
                to,
                ..
            } => {
                wanted.map_or(true, |t| t == target_type) && from.matches(from_status) && to.matches(to_status)
            }
            TriggerSpec::StuckAtStatus { .. } => false,
        }
    }
}
