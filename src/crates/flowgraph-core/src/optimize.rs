//! Graph optimization passes.
//!
//! [`optimize`] rewrites a graph into an equivalent, smaller/faster one:
//!
//! 1. **Dead-node elimination** - nodes with no path to a sink cannot
//!    contribute to the result and are removed.
//! 2. **Cache insertion** - cacheable nodes that feed consumers get a cache
//!    node spliced between them and their consumers, preserving data-flow.
//!
//! Optimization is a fixed point: running it on its own output changes
//! nothing. Elimination finds nothing new once unreachable nodes are gone,
//! and insertion skips any node that already has an adjacent cache node.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::graph::{FlowEdge, FlowGraph, FlowNode, NodeKind, Position};

/// Options controlling the optimization passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    /// Run the cache-insertion pass.
    pub enable_caching: bool,
    /// TTL stamped on inserted cache nodes.
    pub cache_ttl_secs: u64,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            enable_caching: true,
            cache_ttl_secs: 300,
        }
    }
}

/// A before/after measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDelta {
    pub before: usize,
    pub after: usize,
}

/// What the optimizer did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub node_count: CountDelta,
    pub edge_count: CountDelta,
    pub removed_nodes: usize,
    pub inserted_cache_nodes: usize,
}

/// Optimize a graph. Returns the rewritten graph and a report of the
/// changes; the input is left untouched.
pub fn optimize(graph: &FlowGraph, options: &OptimizeOptions) -> (FlowGraph, OptimizeReport) {
    let nodes_before = graph.node_count();
    let edges_before = graph.edge_count();

    let mut out = graph.clone();
    let removed = eliminate_dead_nodes(&mut out);
    info!("removed-{}-redundant-nodes", removed);

    let inserted = if options.enable_caching {
        let n = insert_cache_nodes(&mut out, options.cache_ttl_secs);
        info!("added-{}-cache-nodes", n);
        n
    } else {
        0
    };

    let report = OptimizeReport {
        node_count: CountDelta {
            before: nodes_before,
            after: out.node_count(),
        },
        edge_count: CountDelta {
            before: edges_before,
            after: out.edge_count(),
        },
        removed_nodes: removed,
        inserted_cache_nodes: inserted,
    };
    (out, report)
}

/// Remove every node without a path to a sink. Reachability is computed
/// backward from all sinks over the edge graph.
///
/// A graph with no sink at all is left alone; that is a validation issue,
/// not something elimination should turn into an empty graph.
fn eliminate_dead_nodes(graph: &mut FlowGraph) -> usize {
    let sinks: Vec<String> = graph.sinks().iter().map(|s| s.to_string()).collect();
    if sinks.is_empty() {
        return 0;
    }

    let mut live: HashSet<String> = HashSet::new();
    let mut stack = sinks;
    while let Some(id) = stack.pop() {
        if !live.insert(id.clone()) {
            continue;
        }
        for pred in graph.predecessors(&id) {
            if !live.contains(pred) {
                stack.push(pred.to_string());
            }
        }
    }

    let before = graph.node_count();
    graph.nodes.retain(|n| live.contains(&n.id));
    graph
        .edges
        .retain(|e| live.contains(&e.source) && live.contains(&e.target));
    before - graph.node_count()
}

/// Splice a cache node between each cacheable producer and its consumers.
///
/// Skips producers that already touch a cache node on either side, and
/// producers with no consumers (there is nothing to rewire a sink into).
fn insert_cache_nodes(graph: &mut FlowGraph, ttl_secs: u64) -> usize {
    let candidates: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.kind.cacheable())
        .filter(|n| {
            let adjacent_cache = graph
                .successors(&n.id)
                .into_iter()
                .chain(graph.predecessors(&n.id))
                .any(|other| {
                    matches!(
                        graph.node(other).map(|o| &o.kind),
                        Some(NodeKind::Cache { .. })
                    )
                });
            !adjacent_cache
        })
        .filter(|n| !graph.successors(&n.id).is_empty())
        .map(|n| n.id.clone())
        .collect();

    for producer in &candidates {
        let cache_id = format!("{}-cache", producer);
        let position = graph
            .node(producer)
            .map(|n| Position::new(n.position.x + 80.0, n.position.y))
            .unwrap_or_default();

        // Rewire producer -> consumer edges to cache -> consumer.
        for edge in graph.edges.iter_mut().filter(|e| &e.source == producer) {
            *edge = FlowEdge::between(cache_id.clone(), edge.target.clone());
        }

        let mut cache_node = FlowNode::new(
            cache_id.clone(),
            NodeKind::Cache {
                ttl_secs,
            },
        );
        cache_node.position = position;
        graph.add_node(cache_node);
        graph.add_edge(producer.clone(), cache_id);
    }

    candidates.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FlowNode, NodeKind};
    use crate::validate::validate;
    use serde_json::json;

    fn model(id: &str) -> FlowNode {
        FlowNode::new(
            id,
            NodeKind::Model {
                model_id: "m".into(),
                provider: "p".into(),
            },
        )
        .with_input("prompt", json!("x"))
    }

    fn output(id: &str) -> FlowNode {
        FlowNode::new(
            id,
            NodeKind::Output {
                format: "text".into(),
            },
        )
    }

    fn no_cache() -> OptimizeOptions {
        OptimizeOptions {
            enable_caching: false,
            ..OptimizeOptions::default()
        }
    }

    #[test]
    fn test_unreachable_node_removed() {
        // Node "2" has no path to the sink.
        let mut g = FlowGraph::new();
        g.add_node(model("1"));
        g.add_node(model("2"));
        g.add_node(output("3"));
        g.add_edge("1", "3");

        let (optimized, report) = optimize(&g, &no_cache());
        assert_eq!(report.node_count.before, 3);
        assert_eq!(report.node_count.after, 2);
        assert_eq!(report.removed_nodes, 1);
        assert!(!optimized.contains_node("2"));
        assert!(optimized.contains_node("1"));
    }

    #[test]
    fn test_cache_inserted_between_producer_and_consumer() {
        let mut g = FlowGraph::new();
        g.add_node(model("model-1"));
        g.add_node(output("output-1"));
        g.add_edge("model-1", "output-1");

        let (optimized, report) = optimize(&g, &OptimizeOptions::default());
        assert_eq!(report.inserted_cache_nodes, 1);
        assert!(optimized.contains_node("model-1-cache"));
        // Data flow preserved: model -> cache -> output.
        assert_eq!(optimized.successors("model-1"), vec!["model-1-cache"]);
        assert_eq!(optimized.successors("model-1-cache"), vec!["output-1"]);
        assert!(validate(&optimized).valid);
    }

    #[test]
    fn test_sink_producer_gets_no_cache() {
        let mut g = FlowGraph::new();
        g.add_node(model("model-1"));
        let (optimized, report) = optimize(&g, &OptimizeOptions::default());
        assert_eq!(report.inserted_cache_nodes, 0);
        assert_eq!(optimized.node_count(), 1);
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let mut g = FlowGraph::new();
        g.add_node(model("m1"));
        g.add_node(model("m2"));
        g.add_node(model("dead"));
        g.add_node(output("out"));
        g.add_edge("m1", "m2");
        g.add_edge("m2", "out");

        let options = OptimizeOptions::default();
        let (once, _) = optimize(&g, &options);
        let (twice, report) = optimize(&once, &options);
        assert_eq!(once, twice);
        assert_eq!(report.removed_nodes, 0);
        assert_eq!(report.inserted_cache_nodes, 0);
    }

    #[test]
    fn test_report_counts_scenario() {
        // 3-node graph where node "2" is unreachable from the sink.
        let mut g = FlowGraph::new();
        g.add_node(model("1"));
        g.add_node(model("2"));
        g.add_node(output("3"));
        g.add_edge("1", "3");

        let (_, report) = optimize(&g, &no_cache());
        assert_eq!(report.node_count.before, 3);
        assert_eq!(report.node_count.after, 2);
    }

    #[test]
    fn test_fan_out_rewired_through_single_cache() {
        let mut g = FlowGraph::new();
        g.add_node(model("m"));
        g.add_node(output("a"));
        g.add_node(output("b"));
        g.add_edge("m", "a");
        g.add_edge("m", "b");

        let (optimized, _) = optimize(&g, &OptimizeOptions::default());
        let mut consumers = optimized.successors("m-cache");
        consumers.sort_unstable();
        assert_eq!(consumers, vec!["a", "b"]);
        assert_eq!(optimized.successors("m"), vec!["m-cache"]);
    }
}
