//! Request and response types of the orchestration API.
//!
//! These are the wire-facing DTOs the surrounding application layer
//! exchanges with the engine. Everything is serde-derived; set-valued
//! fields use `BTreeSet` so serialized forms (and fingerprints computed
//! over them) are canonical.

use std::collections::BTreeSet;

use flowgraph_core::FlowGraph;
use sandbox::SecurityLevel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shape of the workflow to plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowType {
    /// One model invocation feeding one output.
    Simple,
    /// A tool-using agent with memory.
    Agent,
    /// A supervisor fanning out to specialist agents.
    MultiAgent,
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowType::Simple => "simple",
            WorkflowType::Agent => "agent",
            WorkflowType::MultiAgent => "multi-agent",
        };
        write!(f, "{}", s)
    }
}

/// Coarse difficulty tier of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Structured interpretation of a natural-language request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub primary_goal: String,
    pub required_capabilities: BTreeSet<String>,
    pub workflow_type: WorkflowType,
    pub complexity: Complexity,
    pub special_requirements: BTreeSet<String>,
}

/// Numeric and policy constraints on a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// Ceiling on estimated cost, in account currency units.
    pub max_cost: Option<f64>,
    /// Ceiling on estimated latency.
    pub max_latency_ms: Option<u64>,
    /// Model ids to prefer, in order.
    pub preferred_models: Vec<String>,
    pub security_level: SecurityLevel,
    /// Restrict selection to locally hosted models.
    pub require_local: bool,
    /// Extra capability tags the plan must cover.
    pub capabilities: BTreeSet<String>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_cost: None,
            max_latency_ms: None,
            preferred_models: Vec::new(),
            security_level: SecurityLevel::Medium,
            require_local: false,
            capabilities: BTreeSet::new(),
        }
    }
}

impl Constraints {
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }
}

/// Caller environment passed along with a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    pub environment: Option<String>,
    pub user_profile: Option<String>,
}

/// An answered clarification question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question_id: String,
    pub values: Vec<String>,
}

/// A request to plan a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub query: String,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub clarifications: Vec<Clarification>,
}

impl OrchestrationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            constraints: Constraints::default(),
            context: RequestContext::default(),
            clarifications: Vec::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Answer a clarification question (second phase of the dialogue).
    pub fn with_clarification(
        mut self,
        question_id: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.clarifications.push(Clarification {
            question_id: question_id.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }
}

/// Input style of a clarification question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    SingleChoice,
    MultiChoice,
    FreeText,
}

/// A question the engine needs answered before it can plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub required: bool,
}

/// A requested capability the catalog could not (fully) satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGap {
    pub requested: String,
    /// The component substituted in, if any.
    pub substituted: Option<String>,
}

/// Plan provenance attached to every response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub components_used: Vec<String>,
    pub models_selected: Vec<String>,
    pub security_checks: Vec<String>,
    pub warnings: Vec<String>,
    pub capability_gaps: Vec<CapabilityGap>,
}

/// An alternative plan the caller could choose instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub label: String,
    /// Human-readable trade-off versus the primary plan.
    pub trade_off: String,
    pub estimated_cost: f64,
    pub estimated_latency_ms: u64,
}

/// The engine's answer: a plan, or a clarification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub flow_id: Uuid,
    pub flow: FlowGraph,
    pub explanation: String,
    /// Confidence in the plan, in `[0, 1]`.
    pub confidence: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: u64,
    pub metadata: ResponseMetadata,
    pub alternatives: Vec<Alternative>,
    pub needs_clarification: bool,
    pub questions: Vec<ClarificationQuestion>,
}

/// A ranked suggestion drawn from historical successful requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub tags: Vec<String>,
}

/// A reusable workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub popularity: u64,
}

/// Caller-observed performance attached to feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceMetrics {
    pub latency_ms: Option<u64>,
    pub cost: Option<f64>,
    pub success_rate: Option<f64>,
}

/// Acknowledgement of submitted feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub flow_id: Uuid,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_round_trip() {
        let request = OrchestrationRequest::new("summarize my inbox")
            .with_constraints(Constraints::default().with_max_cost(0.5))
            .with_clarification("data-source", ["email"]);

        let json = serde_json::to_string(&request).unwrap();
        let back: OrchestrationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, back);
        assert_eq!(back.constraints.max_cost, Some(0.5));
        assert_eq!(back.clarifications[0].question_id, "data-source");
    }

    #[test]
    fn test_constraints_default_on_missing_fields() {
        let request: OrchestrationRequest =
            serde_json::from_str(r#"{"query": "hello"}"#).unwrap();
        assert_eq!(request.constraints, Constraints::default());
        assert!(request.clarifications.is_empty());
    }

    #[test]
    fn test_workflow_type_serializes_kebab_case() {
        let json = serde_json::to_value(WorkflowType::MultiAgent).unwrap();
        assert_eq!(json, "multi-agent");
    }
}
