//! Flow graph data model.
//!
//! A [`FlowGraph`] is a directed graph of typed nodes ([`FlowNode`]) joined
//! by data-dependency edges ([`FlowEdge`]). Node behavior is described by
//! the [`NodeKind`] tagged union: every kind declares which inputs it
//! requires and which defaults it carries, so validation never has to poke
//! at untyped bags of fields.
//!
//! Node and edge order is insertion order, and generated edge ids are a
//! pure function of their endpoints. Two graphs built from the same inputs
//! are therefore structurally identical (`==`), which the planner relies on
//! for cache correctness.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canvas position of a node, carried for editor round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Typed node behavior.
///
/// Serialized with an explicit `kind` tag so graph JSON stays
/// self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeKind {
    /// A single model invocation.
    Model { model_id: String, provider: String },
    /// An agent driving a model with tool access.
    Agent { model_id: String },
    /// An agent permitted to iterate; the only kind through which a cycle
    /// is legal.
    AgentLoop { model_id: String, max_iterations: u32 },
    /// Shared conversation/state memory.
    Memory { store: String },
    /// A capability-backed tool.
    Tool {
        capability_id: String,
        category: String,
    },
    /// Routing node fanning work out to specialist agents.
    Supervisor { model_id: String },
    /// Memoizes its producer's output for downstream consumers.
    Cache { ttl_secs: u64 },
    /// Terminal node delivering the workflow result.
    Output { format: String },
}

impl NodeKind {
    /// Inputs this kind cannot run without. Each must be satisfied by an
    /// incoming edge or a default entry in [`FlowNode::inputs`].
    pub fn required_inputs(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Model { .. } => &["prompt"],
            NodeKind::Agent { .. } | NodeKind::AgentLoop { .. } => &["objective"],
            NodeKind::Supervisor { .. } => &["objective"],
            NodeKind::Cache { .. } => &["source"],
            NodeKind::Output { .. } => &["result"],
            NodeKind::Memory { .. } | NodeKind::Tool { .. } => &[],
        }
    }

    /// Whether the optimizer may memoize this node's output.
    ///
    /// Model and tool invocations are expensive and deterministic enough to
    /// cache; stateful and structural kinds are not.
    pub fn cacheable(&self) -> bool {
        matches!(self, NodeKind::Model { .. } | NodeKind::Tool { .. })
    }

    /// Short type label used in generated node ids and logs.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Model { .. } => "model",
            NodeKind::Agent { .. } => "agent",
            NodeKind::AgentLoop { .. } => "agent-loop",
            NodeKind::Memory { .. } => "memory",
            NodeKind::Tool { .. } => "tool",
            NodeKind::Supervisor { .. } => "supervisor",
            NodeKind::Cache { .. } => "cache",
            NodeKind::Output { .. } => "output",
        }
    }
}

/// A single node in a flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique node id within the graph.
    pub id: String,
    /// Typed behavior of the node.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Editor canvas position.
    #[serde(default)]
    pub position: Position,
    /// Default input configuration; keys here satisfy required inputs that
    /// have no incoming edge.
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            position: Position::default(),
            inputs: Map::new(),
        }
    }

    /// Set the canvas position.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Attach a default input value.
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}

/// A directed data-dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl FlowEdge {
    /// Build an edge with the canonical id for its endpoints.
    ///
    /// Edge ids are derived from the endpoints so regenerated graphs carry
    /// identical ids.
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("edge-{}-{}", source, target),
            source,
            target,
        }
    }
}

/// A directed workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Last write wins on duplicate ids; validation reports
    /// duplicates as a structural issue.
    pub fn add_node(&mut self, node: FlowNode) {
        self.nodes.push(node);
    }

    /// Add an edge between two node ids.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.edges.push(FlowEdge::between(source, target));
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Ids of nodes with an edge from `id`.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Ids of nodes with an edge into `id`.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Whether `id` has at least one incoming edge.
    pub fn has_incoming(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.target == id)
    }

    /// Terminal nodes: no outgoing edges.
    pub fn sinks(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !self.edges.iter().any(|e| e.source == n.id))
            .map(|n| n.id.as_str())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> FlowNode {
        FlowNode::new(
            id,
            NodeKind::Model {
                model_id: "m".into(),
                provider: "p".into(),
            },
        )
    }

    #[test]
    fn test_edge_ids_are_deterministic() {
        let a = FlowEdge::between("n1", "n2");
        let b = FlowEdge::between("n1", "n2");
        assert_eq!(a, b);
        assert_eq!(a.id, "edge-n1-n2");
    }

    #[test]
    fn test_sinks_and_adjacency() {
        let mut g = FlowGraph::new();
        g.add_node(model("a"));
        g.add_node(model("b"));
        g.add_node(model("c"));
        g.add_edge("a", "b");
        g.add_edge("b", "c");

        assert_eq!(g.sinks(), vec!["c"]);
        assert_eq!(g.successors("a"), vec!["b"]);
        assert_eq!(g.predecessors("c"), vec!["b"]);
        assert!(g.has_incoming("b"));
        assert!(!g.has_incoming("a"));
    }

    #[test]
    fn test_kind_tag_serialization() {
        let node = FlowNode::new(
            "loop-1",
            NodeKind::AgentLoop {
                model_id: "m".into(),
                max_iterations: 3,
            },
        );
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "agent-loop");
        assert_eq!(json["max_iterations"], 3);
    }

    #[test]
    fn test_required_inputs_by_kind() {
        assert_eq!(
            NodeKind::Output {
                format: "text".into()
            }
            .required_inputs(),
            &["result"]
        );
        assert!(NodeKind::Memory {
            store: "conversation".into()
        }
        .required_inputs()
        .is_empty());
    }
}
