//! Core workflow type definitions
//!
//! The persisted shape of an authored automation (definition, nodes,
//! connections) plus the small value types shared by every layer: trigger
//! types, target references and the execution context carried between nodes.
//! Node `config` stays untyped here; it is parsed into typed configs when the
//! workflow is compiled (see [`crate::workflow::graph`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// An authored automation: a trigger plus a node graph.
///
/// Owned and edited by admin tooling. The engine only starts executions for
/// definitions with `active == true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "wf-submitted-reminder")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Which kind of trigger starts this workflow
    pub trigger_type: TriggerType,
    /// Trigger-type-specific match conditions
    /// status_changed: { "from": "...", "to": "...", "targetType": "...", "runOnce": bool }
    /// stuck_at_status: { "stuckStatus": "...", "duration": 3, "unit": "days", "runOnce": bool }
    #[serde(default)]
    pub trigger_conditions: Map<String, Value>,
    /// Point-in-time switch read by dispatcher and scanner
    #[serde(default = "default_active")]
    pub active: bool,
    /// Nodes in authoring order
    pub nodes: Vec<Node>,
    /// Directed, branch-labelled edges between nodes
    #[serde(default)]
    pub connections: Vec<Connection>,
}

fn default_active() -> bool {
    true
}

/// A single instruction in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "reminder-email")
    pub id: String,
    /// The type of node which determines execution behavior
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Type-specific configuration, validated at compile time
    #[serde(default)]
    pub config: Value,
    /// Editor canvas position. UI metadata only, never read by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
}

/// Available node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Graph entry point, no-op pass-through
    Trigger,
    /// Render a template and mail it to the target's owner
    /// Expected config: { "templateId": "stuck-reminder", "subject": "optional override" }
    Email,
    /// Suspend the execution for a minimum duration
    /// Expected config: { "duration": 1, "unit": "hours" }
    Delay,
    /// Evaluate a closed-set predicate against live target attributes
    /// Expected config: { "conditionType": "stuck_duration", "conditionValue": 5, "operator": "gte", "unit": "days" }
    Condition,
    /// Outbound HTTP call
    /// Expected config: { "url": "https://...", "method": "POST", "headers": {...} }
    Webhook,
    /// Write a field on the target
    /// Expected config: { "field": "priority", "value": "high" }
    MutateTarget,
    /// Attach a label to the target
    /// Expected config: { "value": "needs-attention" }
    TagTarget,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Trigger => "trigger",
            NodeType::Email => "email",
            NodeType::Delay => "delay",
            NodeType::Condition => "condition",
            NodeType::Webhook => "webhook",
            NodeType::MutateTarget => "mutate_target",
            NodeType::TagTarget => "tag_target",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Source node ID
    pub from: String,
    /// Target node ID
    pub to: String,
    /// Which outcome of the source node this edge follows
    #[serde(rename = "type", default)]
    pub branch: BranchLabel,
}

/// Edge label. `yes`/`no` are only legal out of condition nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchLabel {
    #[default]
    Next,
    Yes,
    No,
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BranchLabel::Next => "next",
            BranchLabel::Yes => "yes",
            BranchLabel::No => "no",
        })
    }
}

/// What starts a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A discrete "target moved from status A to B" event
    StatusChanged,
    /// Periodic scan for targets sitting in one status for too long
    StuckAtStatus,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::StatusChanged => "status_changed",
            TriggerType::StuckAtStatus => "stuck_at_status",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status_changed" => Ok(TriggerType::StatusChanged),
            "stuck_at_status" => Ok(TriggerType::StuckAtStatus),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// Domain entity collections a workflow can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Application,
    Contract,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Application => "application",
            TargetType::Contract => "contract",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application" => Ok(TargetType::Application),
            "contract" => Ok(TargetType::Contract),
            other => Err(format!("unknown target type: {other}")),
        }
    }
}

/// One domain entity, e.g. `application/42`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub target_type: TargetType,
    pub id: String,
}

impl TargetRef {
    pub fn new(target_type: TargetType, id: impl Into<String>) -> Self {
        Self {
            target_type,
            id: id.into(),
        }
    }

    pub fn application(id: impl Into<String>) -> Self {
        Self::new(TargetType::Application, id)
    }

    pub fn contract(id: impl Into<String>) -> Self {
        Self::new(TargetType::Contract, id)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target_type, self.id)
    }
}

/// Runtime execution context passed between nodes
///
/// Serialized verbatim into continuation tokens, so everything in here must
/// survive a process restart. Target and workflow identity live on the
/// execution record, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Data describing why the execution started
    /// status_changed: { "from": "...", "to": "..." }
    /// stuck_at_status: { "stuckStatus": "...", "stuckSince": "..." }
    pub trigger: Map<String, Value>,
    /// Bookkeeping accumulated while walking the graph (visited nodes, timestamps)
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    /// Context for a `status_changed` trigger
    pub fn from_status_change(from: &str, to: &str) -> Self {
        let mut trigger = Map::new();
        trigger.insert("from".to_string(), Value::String(from.to_string()));
        trigger.insert("to".to_string(), Value::String(to.to_string()));

        Self {
            trigger,
            metadata: Map::new(),
        }
    }

    /// Context for a `stuck_at_status` trigger found by the scanner
    pub fn from_stuck_scan(status: &str, changed_before: chrono::DateTime<chrono::Utc>) -> Self {
        let mut trigger = Map::new();
        trigger.insert("stuckStatus".to_string(), Value::String(status.to_string()));
        trigger.insert(
            "stuckSince".to_string(),
            Value::String(changed_before.to_rfc3339()),
        );

        Self {
            trigger,
            metadata: Map::new(),
        }
    }

    /// Record that `node_id` is being visited
    pub fn enter_node(&mut self, node_id: &str, at: chrono::DateTime<chrono::Utc>) {
        self.metadata
            .insert("current_node_id".to_string(), Value::String(node_id.to_string()));
        self.metadata
            .insert("current_node_started_at".to_string(), Value::String(at.to_rfc3339()));

        let visited = self
            .metadata
            .entry("visited".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(nodes) = visited {
            nodes.push(Value::String(node_id.to_string()));
        }
    }

    /// Node ids visited so far, in order, across suspensions
    pub fn visited(&self) -> Vec<String> {
        self.metadata
            .get("visited")
            .and_then(Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_parses_persisted_shape_and_ignores_position() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "Reminder",
            "triggerType": "stuck_at_status",
            "triggerConditions": { "stuckStatus": "submitted", "duration": 3, "unit": "days" },
            "nodes": [
                { "id": "t", "type": "trigger", "config": {}, "position": { "x": 10, "y": 20 } },
                { "id": "e", "type": "email", "config": { "templateId": "reminder" } }
            ],
            "connections": [ { "from": "t", "to": "e", "type": "next" } ]
        }))
        .unwrap();

        assert!(def.active);
        assert_eq!(def.trigger_type, TriggerType::StuckAtStatus);
        assert_eq!(def.nodes[1].node_type, NodeType::Email);
        assert_eq!(def.connections[0].branch, BranchLabel::Next);
    }

    #[test]
    fn connection_type_defaults_to_next() {
        let conn: Connection = serde_json::from_value(json!({ "from": "a", "to": "b" })).unwrap();
        assert_eq!(conn.branch, BranchLabel::Next);
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let err = serde_json::from_value::<Node>(json!({ "id": "x", "type": "lua_script" }));
        assert!(err.is_err());
    }

    #[test]
    fn context_tracks_visited_nodes() {
        let mut ctx = ExecutionContext::from_status_change("draft", "submitted");
        let now = chrono::Utc::now();
        ctx.enter_node("t", now);
        ctx.enter_node("e", now);

        assert_eq!(ctx.visited(), vec!["t".to_string(), "e".to_string()]);
        assert_eq!(ctx.trigger["to"], json!("submitted"));
    }
}
