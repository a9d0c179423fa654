//! Petgraph-backed workflow graph
//!
//! Compiles a definition's node and connection lists into an arena of typed
//! nodes with labelled edges, validating structure once at load:
//! exactly one trigger with no incoming edges, known endpoints, branch
//! cardinality (conditions have one `yes` and one `no`, everything else at
//! most one `next`), no cycles and no nodes unreachable from the trigger.

use crate::error::ConfigValidationError;
use crate::workflow::config::NodeKind;
use crate::workflow::types::{BranchLabel, WorkflowDefinition};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use std::collections::HashMap;

/// A node after config validation
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub kind: NodeKind,
}

/// Validated, execution-ready graph
#[derive(Debug)]
pub struct WorkflowGraph {
    graph: DiGraph<CompiledNode, BranchLabel>,
    node_id_to_index: HashMap<String, NodeIndex>,
    trigger: NodeIndex,
}

impl WorkflowGraph {
    /// Build and validate the graph for `definition`
    pub fn compile(definition: &WorkflowDefinition) -> Result<Self, ConfigValidationError> {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();
        let mut triggers = Vec::new();

        for node in &definition.nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(ConfigValidationError::DuplicateNodeId(node.id.clone()));
            }
            let kind = NodeKind::parse(node)?;
            let is_trigger = matches!(kind, NodeKind::Trigger);
            let index = graph.add_node(CompiledNode {
                id: node.id.clone(),
                kind,
            });
            node_id_to_index.insert(node.id.clone(), index);
            if is_trigger {
                triggers.push(index);
            }
        }

        let trigger = match triggers.as_slice() {
            [] => return Err(ConfigValidationError::MissingTrigger),
            [single] => *single,
            many => return Err(ConfigValidationError::MultipleTriggers(many.len())),
        };

        for connection in &definition.connections {
            let from = *node_id_to_index.get(&connection.from).ok_or_else(|| {
                ConfigValidationError::UnknownNodeReference {
                    node_id: connection.from.clone(),
                    side: "from",
                }
            })?;
            let to = *node_id_to_index.get(&connection.to).ok_or_else(|| {
                ConfigValidationError::UnknownNodeReference {
                    node_id: connection.to.clone(),
                    side: "to",
                }
            })?;
            if to == trigger {
                return Err(ConfigValidationError::TriggerHasIncoming(connection.to.clone()));
            }
            graph.add_edge(from, to, connection.branch);
        }

        for index in graph.node_indices() {
            Self::check_branches(&graph, index)?;
        }

        if is_cyclic_directed(&graph) {
            return Err(ConfigValidationError::CycleDetected);
        }

        let mut reachable = vec![false; graph.node_count()];
        let mut dfs = Dfs::new(&graph, trigger);
        while let Some(index) = dfs.next(&graph) {
            reachable[index.index()] = true;
        }
        if let Some(index) = graph.node_indices().find(|i| !reachable[i.index()]) {
            return Err(ConfigValidationError::UnreachableNode(graph[index].id.clone()));
        }

        Ok(Self {
            graph,
            node_id_to_index,
            trigger,
        })
    }

    fn check_branches(
        graph: &DiGraph<CompiledNode, BranchLabel>,
        index: NodeIndex,
    ) -> Result<(), ConfigValidationError> {
        let node = &graph[index];
        let (mut next, mut yes, mut no) = (0, 0, 0);
        for edge in graph.edges_directed(index, Direction::Outgoing) {
            match edge.weight() {
                BranchLabel::Next => next += 1,
                BranchLabel::Yes => yes += 1,
                BranchLabel::No => no += 1,
            }
        }

        if matches!(node.kind, NodeKind::Condition(_)) {
            if yes != 1 || no != 1 || next != 0 {
                return Err(ConfigValidationError::ConditionBranches {
                    node_id: node.id.clone(),
                    yes,
                    no,
                    next,
                });
            }
            return Ok(());
        }

        if yes > 0 || no > 0 {
            return Err(ConfigValidationError::UnexpectedBranch {
                node_id: node.id.clone(),
                label: if yes > 0 { BranchLabel::Yes } else { BranchLabel::No },
            });
        }
        if next > 1 {
            return Err(ConfigValidationError::MultipleSuccessors(node.id.clone()));
        }
        Ok(())
    }

    /// The graph entry point
    pub fn trigger(&self) -> &CompiledNode {
        &self.graph[self.trigger]
    }

    pub fn node(&self, node_id: &str) -> Option<&CompiledNode> {
        self.node_id_to_index.get(node_id).map(|&index| &self.graph[index])
    }

    /// Follow the `label` edge out of `node_id`, if there is one
    pub fn successor(&self, node_id: &str, label: BranchLabel) -> Option<&CompiledNode> {
        let index = *self.node_id_to_index.get(node_id)?;
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .find(|edge| *edge.weight() == label)
            .map(|edge| &self.graph[edge.target()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connection, Node, NodeType, TriggerType};
    use serde_json::{json, Value};

    fn node(id: &str, node_type: NodeType, config: Value) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            config,
            position: None,
        }
    }

    fn edge(from: &str, to: &str, branch: BranchLabel) -> Connection {
        Connection {
            from: from.to_string(),
            to: to.to_string(),
            branch,
        }
    }

    fn email(id: &str) -> Node {
        node(id, NodeType::Email, json!({ "templateId": id }))
    }

    fn condition(id: &str) -> Node {
        node(
            id,
            NodeType::Condition,
            json!({ "conditionType": "status_equals", "conditionValue": "submitted" }),
        )
    }

    fn definition(nodes: Vec<Node>, connections: Vec<Connection>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".to_string(),
            name: "wf".to_string(),
            trigger_type: TriggerType::StatusChanged,
            trigger_conditions: Default::default(),
            active: true,
            nodes,
            connections,
        }
    }

    #[test]
    fn compiles_branching_graph() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), condition("c"), email("yes"), email("no")],
            vec![
                edge("t", "c", BranchLabel::Next),
                edge("c", "yes", BranchLabel::Yes),
                edge("c", "no", BranchLabel::No),
            ],
        );
        let graph = WorkflowGraph::compile(&def).unwrap();

        assert_eq!(graph.trigger().id, "t");
        assert_eq!(graph.successor("t", BranchLabel::Next).unwrap().id, "c");
        assert_eq!(graph.successor("c", BranchLabel::Yes).unwrap().id, "yes");
        assert_eq!(graph.successor("c", BranchLabel::No).unwrap().id, "no");
        assert!(graph.successor("yes", BranchLabel::Next).is_none());
    }

    #[test]
    fn rejects_missing_and_duplicate_triggers() {
        let none = definition(vec![email("e")], vec![]);
        assert_eq!(WorkflowGraph::compile(&none).unwrap_err(), ConfigValidationError::MissingTrigger);

        let two = definition(
            vec![node("t1", NodeType::Trigger, json!({})), node("t2", NodeType::Trigger, json!({}))],
            vec![],
        );
        assert_eq!(WorkflowGraph::compile(&two).unwrap_err(), ConfigValidationError::MultipleTriggers(2));
    }

    #[test]
    fn rejects_cycles() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), email("a"), email("b")],
            vec![
                edge("t", "a", BranchLabel::Next),
                edge("a", "b", BranchLabel::Next),
                edge("b", "a", BranchLabel::Next),
            ],
        );
        // "a" has a single next edge, so the cycle is what trips validation
        assert_eq!(WorkflowGraph::compile(&def).unwrap_err(), ConfigValidationError::CycleDetected);
    }

    #[test]
    fn rejects_condition_without_both_branches() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), condition("c"), email("yes")],
            vec![edge("t", "c", BranchLabel::Next), edge("c", "yes", BranchLabel::Yes)],
        );
        assert!(matches!(
            WorkflowGraph::compile(&def).unwrap_err(),
            ConfigValidationError::ConditionBranches { yes: 1, no: 0, .. }
        ));
    }

    #[test]
    fn rejects_branch_labels_on_linear_nodes() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), email("a")],
            vec![edge("t", "a", BranchLabel::Yes)],
        );
        assert!(matches!(
            WorkflowGraph::compile(&def).unwrap_err(),
            ConfigValidationError::UnexpectedBranch { .. }
        ));
    }

    #[test]
    fn rejects_fan_out_on_linear_nodes() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), email("a"), email("b")],
            vec![edge("t", "a", BranchLabel::Next), edge("t", "b", BranchLabel::Next)],
        );
        assert_eq!(
            WorkflowGraph::compile(&def).unwrap_err(),
            ConfigValidationError::MultipleSuccessors("t".to_string())
        );
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), email("a"), email("orphan")],
            vec![edge("t", "a", BranchLabel::Next)],
        );
        assert_eq!(
            WorkflowGraph::compile(&def).unwrap_err(),
            ConfigValidationError::UnreachableNode("orphan".to_string())
        );
    }

    #[test]
    fn rejects_edges_into_trigger_and_unknown_nodes() {
        let into_trigger = definition(
            vec![node("t", NodeType::Trigger, json!({})), email("a")],
            vec![edge("t", "a", BranchLabel::Next), edge("a", "t", BranchLabel::Next)],
        );
        assert_eq!(
            WorkflowGraph::compile(&into_trigger).unwrap_err(),
            ConfigValidationError::TriggerHasIncoming("t".to_string())
        );

        let unknown = definition(
            vec![node("t", NodeType::Trigger, json!({}))],
            vec![edge("t", "ghost", BranchLabel::Next)],
        );
        assert!(matches!(
            WorkflowGraph::compile(&unknown).unwrap_err(),
            ConfigValidationError::UnknownNodeReference { side: "to", .. }
        ));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let def = definition(
            vec![node("t", NodeType::Trigger, json!({})), email("a"), email("a")],
            vec![edge("t", "a", BranchLabel::Next)],
        );
        assert_eq!(
            WorkflowGraph::compile(&def).unwrap_err(),
            ConfigValidationError::DuplicateNodeId("a".to_string())
        );
    }
}
