//! Flow generation.
//!
//! [`FlowGenerator::generate`] is a pure function of the intent, a catalog
//! snapshot, and the model selection: identical inputs against the same
//! catalog version always produce a structurally identical graph. That
//! determinism is what makes response caching sound.
//!
//! Unmatchable capabilities degrade the plan instead of failing it: the
//! generator emits a best-effort graph and records an explicit
//! [`CapabilityGap`] per miss.

use flowgraph_core::{FlowGraph, FlowNode, NodeKind};
use serde_json::json;
use tracing::debug;

use crate::catalog::{Capability, CapabilityCatalog};
use crate::router::ModelSelection;
use crate::types::{CapabilityGap, Intent, WorkflowType};

/// A generated plan: the graph plus its provenance.
#[derive(Debug, Clone)]
pub struct GeneratedFlow {
    pub graph: FlowGraph,
    /// Catalog component ids consulted for the plan.
    pub components_used: Vec<String>,
    pub capability_gaps: Vec<CapabilityGap>,
    pub shape: WorkflowType,
}

/// Deterministic shape-based graph generator.
#[derive(Debug, Default)]
pub struct FlowGenerator;

impl FlowGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Compile an intent into a workflow graph.
    pub fn generate(
        &self,
        intent: &Intent,
        catalog: &CapabilityCatalog,
        selection: &ModelSelection,
    ) -> GeneratedFlow {
        // Match every required capability against the catalog up front;
        // matches inform the plan in every shape, and misses become gaps.
        let mut components_used: Vec<String> = Vec::new();
        let mut capability_gaps = Vec::new();
        let mut matched: Vec<(&str, &Capability)> = Vec::new();
        for required in &intent.required_capabilities {
            match best_component(catalog, required) {
                Some(component) => {
                    if !components_used.contains(&component.id) {
                        components_used.push(component.id.clone());
                    }
                    matched.push((required.as_str(), component));
                }
                None => capability_gaps.push(CapabilityGap {
                    requested: required.clone(),
                    substituted: None,
                }),
            }
        }

        let graph = match intent.workflow_type {
            WorkflowType::Simple => self.simple_shape(intent, selection),
            WorkflowType::Agent => self.agent_shape(intent, selection, &matched),
            WorkflowType::MultiAgent => self.multi_agent_shape(intent, selection, &matched),
        };

        debug!(
            shape = %intent.workflow_type,
            nodes = graph.node_count(),
            gaps = capability_gaps.len(),
            "flow generated"
        );

        GeneratedFlow {
            graph,
            components_used,
            capability_gaps,
            shape: intent.workflow_type,
        }
    }

    /// One model node feeding one output node.
    fn simple_shape(&self, intent: &Intent, selection: &ModelSelection) -> FlowGraph {
        let mut graph = FlowGraph::new();
        graph.add_node(
            model_node("model-1", selection)
                .at(0.0, 0.0)
                .with_input("prompt", json!(intent.primary_goal)),
        );
        graph.add_node(output_node("output-1").at(200.0, 0.0));
        graph.add_edge("model-1", "output-1");
        graph
    }

    /// An agent with memory and one tool node per matched capability.
    fn agent_shape(
        &self,
        intent: &Intent,
        selection: &ModelSelection,
        matched: &[(&str, &Capability)],
    ) -> FlowGraph {
        let mut graph = FlowGraph::new();
        graph.add_node(
            FlowNode::new(
                "agent-1",
                NodeKind::Agent {
                    model_id: selection.primary.model_id.clone(),
                },
            )
            .at(200.0, 0.0)
            .with_input("objective", json!(intent.primary_goal)),
        );
        graph.add_node(
            FlowNode::new(
                "memory-1",
                NodeKind::Memory {
                    store: "conversation".into(),
                },
            )
            .at(0.0, -100.0),
        );
        graph.add_edge("memory-1", "agent-1");

        for (i, (required, component)) in matched.iter().enumerate() {
            let id = format!("tool-{}", required);
            graph.add_node(
                FlowNode::new(
                    id.clone(),
                    NodeKind::Tool {
                        capability_id: component.id.clone(),
                        category: component.category.clone(),
                    },
                )
                .at(0.0, 100.0 * (i as f64 + 1.0)),
            );
            graph.add_edge(id, "agent-1");
        }

        graph.add_node(output_node("output-1").at(400.0, 0.0));
        graph.add_edge("agent-1", "output-1");
        graph
    }

    /// A supervisor fanning out to specialists that share one memory node.
    fn multi_agent_shape(
        &self,
        intent: &Intent,
        selection: &ModelSelection,
        matched: &[(&str, &Capability)],
    ) -> FlowGraph {
        let mut graph = FlowGraph::new();
        graph.add_node(
            FlowNode::new(
                "supervisor-1",
                NodeKind::Supervisor {
                    model_id: selection.primary.model_id.clone(),
                },
            )
            .at(0.0, 0.0)
            .with_input("objective", json!(intent.primary_goal)),
        );
        graph.add_node(
            FlowNode::new(
                "memory-1",
                NodeKind::Memory {
                    store: "shared".into(),
                },
            )
            .at(0.0, -150.0),
        );
        graph.add_node(output_node("output-1").at(400.0, 0.0));

        // One specialist per matched capability; a lone generalist when the
        // catalog matched nothing. Specialists share the primary model so
        // cost estimates stay a function of one descriptor.
        let specialist_count = matched.len().max(1);
        for i in 0..specialist_count {
            let model = &selection.primary;
            let id = match matched.get(i) {
                Some((required, _)) => format!("specialist-{}", required),
                None => "specialist-general".to_string(),
            };
            graph.add_node(
                FlowNode::new(
                    id.clone(),
                    NodeKind::Agent {
                        model_id: model.model_id.clone(),
                    },
                )
                .at(200.0, 150.0 * i as f64),
            );
            graph.add_edge("supervisor-1", id.clone());
            graph.add_edge("memory-1", id.clone());
            graph.add_edge(id.clone(), "output-1");

            if let Some((required, component)) = matched.get(i) {
                let tool_id = format!("tool-{}", required);
                graph.add_node(
                    FlowNode::new(
                        tool_id.clone(),
                        NodeKind::Tool {
                            capability_id: component.id.clone(),
                            category: component.category.clone(),
                        },
                    )
                    .at(100.0, 150.0 * i as f64 + 50.0),
                );
                graph.add_edge(tool_id, id);
            }
        }
        graph
    }
}

fn model_node(id: &str, selection: &ModelSelection) -> FlowNode {
    FlowNode::new(
        id,
        NodeKind::Model {
            model_id: selection.primary.model_id.clone(),
            provider: selection.primary.provider.clone(),
        },
    )
}

fn output_node(id: &str) -> FlowNode {
    FlowNode::new(
        id,
        NodeKind::Output {
            format: "text".into(),
        },
    )
}

/// Best catalog match for a required capability: exact tag match first,
/// then token-overlap search.
fn best_component<'a>(catalog: &'a CapabilityCatalog, required: &str) -> Option<&'a Capability> {
    catalog
        .search(required)
        .into_iter()
        .find(|c| c.tags.iter().any(|t| t == required) || c.id == required)
        .or_else(|| catalog.search(required).into_iter().next())
}
