//! Structural validation of flow graphs.
//!
//! Validation answers one question: can this graph be executed at all?
//! Checks performed:
//! - every edge endpoint resolves to an existing node
//! - node ids are unique
//! - every required input is satisfied by an incoming edge or a default
//! - the graph has at least one sink
//! - cycles only occur through an `AgentLoop` node
//!
//! Problems are returned as typed issues in a [`ValidationReport`], never
//! as errors: a malformed graph is a data condition the caller reports,
//! not a fault.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::graph::{FlowGraph, NodeKind};

/// Category of a structural problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// An edge references a node id that does not exist.
    DanglingEdge,
    /// Two nodes share an id.
    DuplicateNode,
    /// A required input has neither an incoming edge nor a default.
    MissingInput,
    /// The graph has no terminal node.
    NoSink,
    /// A cycle exists that does not pass through an `AgentLoop` node.
    UnexpectedCycle,
}

/// A single structural problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    /// Node the issue concerns, when applicable.
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            node_id: node_id.map(str::to_owned),
            message: message.into(),
        }
    }
}

/// Outcome of structural validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

/// Validate a graph's structure.
pub fn validate(graph: &FlowGraph) -> ValidationReport {
    let mut issues = Vec::new();

    check_duplicate_nodes(graph, &mut issues);
    check_edges_resolve(graph, &mut issues);
    check_required_inputs(graph, &mut issues);
    check_sinks(graph, &mut issues);
    check_cycles(graph, &mut issues);

    ValidationReport {
        valid: issues.is_empty(),
        issues,
    }
}

fn check_duplicate_nodes(graph: &FlowGraph, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            issues.push(ValidationIssue::new(
                IssueCode::DuplicateNode,
                Some(&node.id),
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }
}

fn check_edges_resolve(graph: &FlowGraph, issues: &mut Vec<ValidationIssue>) {
    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !graph.contains_node(endpoint) {
                issues.push(ValidationIssue::new(
                    IssueCode::DanglingEdge,
                    Some(endpoint),
                    format!("edge '{}' references missing node '{}'", edge.id, endpoint),
                ));
            }
        }
    }
}

fn check_required_inputs(graph: &FlowGraph, issues: &mut Vec<ValidationIssue>) {
    for node in &graph.nodes {
        for input in node.kind.required_inputs() {
            let satisfied = node.inputs.contains_key(*input) || graph.has_incoming(&node.id);
            if !satisfied {
                issues.push(ValidationIssue::new(
                    IssueCode::MissingInput,
                    Some(&node.id),
                    format!(
                        "node '{}' requires input '{}' but has no incoming edge or default",
                        node.id, input
                    ),
                ));
            }
        }
    }
}

fn check_sinks(graph: &FlowGraph, issues: &mut Vec<ValidationIssue>) {
    if !graph.nodes.is_empty() && graph.sinks().is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::NoSink,
            None,
            "graph has no terminal node",
        ));
    }
}

/// Cycle check via depth-first search. A back edge closes a cycle; the
/// cycle is legal only if some node on it is an `AgentLoop`.
fn check_cycles(graph: &FlowGraph, issues: &mut Vec<ValidationIssue>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut marks: HashMap<&str, Mark> = ids.iter().map(|id| (*id, Mark::New)).collect();
    let mut flagged: HashSet<String> = HashSet::new();

    fn visit<'a>(
        graph: &'a FlowGraph,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        flagged: &mut HashSet<String>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        marks.insert(id, Mark::Active);
        path.push(id);

        for next in graph.successors(id) {
            match marks.get(next).copied() {
                Some(Mark::New) => visit(graph, next, marks, path, flagged, issues),
                Some(Mark::Active) => {
                    // Cycle: the path segment from `next` to `id`.
                    let start = path.iter().position(|p| *p == next).unwrap_or(0);
                    let cycle = &path[start..];
                    let has_loop_node = cycle.iter().any(|n| {
                        matches!(
                            graph.node(n).map(|n| &n.kind),
                            Some(NodeKind::AgentLoop { .. })
                        )
                    });
                    if !has_loop_node && flagged.insert(next.to_string()) {
                        issues.push(ValidationIssue::new(
                            IssueCode::UnexpectedCycle,
                            Some(next),
                            format!("cycle through '{}' has no agent-loop node", next),
                        ));
                    }
                }
                _ => {}
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
    }

    let mut path = Vec::new();
    for id in ids {
        if marks[id] == Mark::New {
            visit(graph, id, &mut marks, &mut path, &mut flagged, issues);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FlowNode, NodeKind};
    use serde_json::json;

    fn model(id: &str) -> FlowNode {
        FlowNode::new(
            id,
            NodeKind::Model {
                model_id: "m".into(),
                provider: "p".into(),
            },
        )
    }

    fn output(id: &str) -> FlowNode {
        FlowNode::new(
            id,
            NodeKind::Output {
                format: "text".into(),
            },
        )
    }

    fn simple_valid_graph() -> FlowGraph {
        let mut g = FlowGraph::new();
        g.add_node(model("model-1").with_input("prompt", json!("hi")));
        g.add_node(output("output-1"));
        g.add_edge("model-1", "output-1");
        g
    }

    #[test]
    fn test_valid_graph_passes() {
        let report = validate(&simple_valid_graph());
        assert!(report.valid, "issues: {:?}", report.issues);
    }

    #[test]
    fn test_dangling_edge_reported() {
        let mut g = simple_valid_graph();
        g.add_edge("output-1", "ghost");
        let report = validate(&g);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::DanglingEdge));
    }

    #[test]
    fn test_duplicate_node_reported() {
        let mut g = simple_valid_graph();
        g.add_node(model("model-1").with_input("prompt", json!("again")));
        let report = validate(&g);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::DuplicateNode));
    }

    #[test]
    fn test_missing_required_input_reported() {
        let mut g = FlowGraph::new();
        // Model node with no prompt default and no incoming edge.
        g.add_node(model("model-1"));
        g.add_node(output("output-1"));
        g.add_edge("model-1", "output-1");
        let report = validate(&g);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::MissingInput && i.node_id.as_deref() == Some("model-1")));
    }

    #[test]
    fn test_cycle_without_loop_node_rejected() {
        let mut g = FlowGraph::new();
        g.add_node(model("a").with_input("prompt", json!("x")));
        g.add_node(model("b"));
        g.add_node(output("out"));
        g.add_edge("a", "b");
        g.add_edge("b", "a");
        g.add_edge("b", "out");
        let report = validate(&g);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::UnexpectedCycle));
    }

    #[test]
    fn test_agent_loop_cycle_allowed() {
        let mut g = FlowGraph::new();
        g.add_node(FlowNode::new(
            "loop-1",
            NodeKind::AgentLoop {
                model_id: "m".into(),
                max_iterations: 4,
            },
        ));
        g.nodes[0].inputs.insert("objective".into(), json!("go"));
        g.add_node(FlowNode::new(
            "tool-1",
            NodeKind::Tool {
                capability_id: "search".into(),
                category: "retrieval".into(),
            },
        ));
        g.add_node(output("out"));
        g.add_edge("loop-1", "tool-1");
        g.add_edge("tool-1", "loop-1");
        g.add_edge("loop-1", "out");
        let report = validate(&g);
        assert!(
            !report
                .issues
                .iter()
                .any(|i| i.code == IssueCode::UnexpectedCycle),
            "issues: {:?}",
            report.issues
        );
    }

    #[test]
    fn test_no_sink_reported() {
        let mut g = FlowGraph::new();
        g.add_node(FlowNode::new(
            "loop-1",
            NodeKind::AgentLoop {
                model_id: "m".into(),
                max_iterations: 2,
            },
        ));
        g.nodes[0].inputs.insert("objective".into(), json!("go"));
        g.add_node(
            FlowNode::new(
                "tool-1",
                NodeKind::Tool {
                    capability_id: "search".into(),
                    category: "retrieval".into(),
                },
            ),
        );
        g.add_edge("loop-1", "tool-1");
        g.add_edge("tool-1", "loop-1");
        let report = validate(&g);
        assert!(report.issues.iter().any(|i| i.code == IssueCode::NoSink));
    }
}
