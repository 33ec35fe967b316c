//! The meta-orchestrator: one request in, one structured response out.
//!
//! `orchestrate` always returns something actionable - a (possibly
//! degraded) plan or a clarification request - and only errors on
//! malformed input or unrecoverable infrastructure failure. The pipeline:
//! fingerprint → cache → clarification branch → single-flight generation
//! (catalog snapshot, intent, model selection, generation, optimization,
//! validation, estimates, persistence, telemetry, cache fill).
//!
//! Concurrent calls sharing a fingerprint join one generation; an
//! instrumented generation counter makes that observable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use flowgraph_core::{optimize, validate, FlowGraph, NodeKind};
use sandbox::{
    CodeLanguage, ExecutionOutcome, ExecutionTask, SandboxConfig, SandboxManager, SecurityLevel,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{fingerprint, normalize_query, request_digest, CacheMetrics, ResponseCache};
use crate::catalog::CatalogService;
use crate::config::{EngineConfig, EstimatePolicy};
use crate::generator::{FlowGenerator, GeneratedFlow};
use crate::intent::{ExtractedIntent, IntentExtractor};
use crate::router::{ModelDescriptor, ModelRegistry, ModelSelection, SelectionCriteria};
use crate::singleflight::SingleFlight;
use crate::stores::{
    FlowRecord, FlowStore, InMemoryFlowStore, NullTelemetry, TelemetryEvent, TelemetrySink,
};
use crate::types::{
    Alternative, ClarificationQuestion, FeedbackAck, OrchestrationRequest, OrchestrationResponse,
    PerformanceMetrics, ResponseMetadata, Suggestion, TemplateSummary, WorkflowType,
};
use crate::{OrchestratorError, Result};

/// Engine observability counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMetricsSnapshot {
    /// Generation pipelines actually run (single-flight joins share one).
    pub generations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub clarifications: u64,
}

#[derive(Default)]
struct MetricsInner {
    generations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    clarifications: AtomicU64,
}

struct HistoryEntry {
    query: String,
    tags: Vec<String>,
    uses: u64,
}

struct Inner {
    config: EngineConfig,
    intent: IntentExtractor,
    generator: FlowGenerator,
    catalog: Arc<CatalogService>,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn FlowStore>,
    telemetry: Arc<dyn TelemetrySink>,
    sandbox: Arc<SandboxManager>,
    cache: ResponseCache,
    flights: SingleFlight<OrchestrationResponse>,
    metrics: MetricsInner,
    history: DashMap<String, HistoryEntry>,
    templates: DashMap<String, TemplateSummary>,
    /// Feedback-derived confidence calibration factor (f64 bits).
    calibration: AtomicU64,
}

/// Builder for [`MetaOrchestrator`].
pub struct OrchestratorBuilder {
    catalog: Arc<CatalogService>,
    registry: Arc<ModelRegistry>,
    config: EngineConfig,
    store: Arc<dyn FlowStore>,
    telemetry: Arc<dyn TelemetrySink>,
    sandbox: Arc<SandboxManager>,
}

impl OrchestratorBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn FlowStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<SandboxManager>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn build(self) -> MetaOrchestrator {
        let inner = Inner {
            intent: IntentExtractor::new(self.config.intent),
            generator: FlowGenerator::new(),
            cache: ResponseCache::new(self.config.cache),
            flights: SingleFlight::new(),
            metrics: MetricsInner::default(),
            history: DashMap::new(),
            templates: seed_templates(),
            calibration: AtomicU64::new(1.0f64.to_bits()),
            config: self.config,
            catalog: self.catalog,
            registry: self.registry,
            store: self.store,
            telemetry: self.telemetry,
            sandbox: self.sandbox,
        };
        MetaOrchestrator {
            inner: Arc::new(inner),
        }
    }
}

/// Top-level coordinator over catalog, router, generator, optimizer,
/// cache, and sandbox.
#[derive(Clone)]
pub struct MetaOrchestrator {
    inner: Arc<Inner>,
}

impl MetaOrchestrator {
    pub fn builder(
        catalog: Arc<CatalogService>,
        registry: Arc<ModelRegistry>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            catalog,
            registry,
            config: EngineConfig::default(),
            store: Arc::new(InMemoryFlowStore::new()),
            telemetry: Arc::new(NullTelemetry),
            sandbox: Arc::new(SandboxManager::new()),
        }
    }

    /// Engine with default collaborators (in-memory store, no telemetry).
    pub fn new(catalog: Arc<CatalogService>, registry: Arc<ModelRegistry>) -> Self {
        Self::builder(catalog, registry).build()
    }

    /// Plan a workflow for a request. See the module docs for the pipeline.
    pub async fn orchestrate(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationResponse> {
        validate_request(&request)?;

        let key = fingerprint(&request.query, &request.constraints, &request.clarifications);
        let digest = request_digest(&request);

        if let Some(hit) = self.inner.cache.get(&key, &digest) {
            self.inner.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key, "orchestration served from cache");
            self.inner.telemetry.emit(TelemetryEvent::OrchestrationCompleted {
                flow_id: hit.flow_id,
                workflow_type: shape_of(&hit.flow).to_string(),
                estimated_cost: hit.estimated_cost,
                cache_hit: true,
            });
            return Ok(hit);
        }
        self.inner.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let extracted =
            self.inner
                .intent
                .extract(&request.query, &request.constraints, &request.clarifications);

        // Two-phase protocol: an ambiguous first-phase request gets a
        // question set back; the engine never blocks waiting for answers.
        if request.clarifications.is_empty() && extracted.ambiguous {
            let questions = self.inner.intent.questions(&extracted);
            self.inner
                .metrics
                .clarifications
                .fetch_add(1, Ordering::Relaxed);
            self.inner.telemetry.emit(TelemetryEvent::ClarificationRequested {
                questions: questions.len(),
            });
            return Ok(clarification_response(questions));
        }

        let engine = self.clone();
        let request_for_flight = request.clone();
        let flight_key = key.clone();
        let response = self
            .inner
            .flights
            .run(&key, move || async move {
                engine
                    .generate_plan(request_for_flight, extracted, flight_key, digest)
                    .await
            })
            .await?;
        Ok((*response).clone())
    }

    /// Ranked suggestions from historical successful requests.
    pub fn suggest(&self, query_prefix: &str) -> Vec<Suggestion> {
        let normalized = normalize_query(query_prefix);
        if normalized.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<(u64, Suggestion)> = self
            .inner
            .history
            .iter()
            .filter(|entry| entry.key().starts_with(&normalized))
            .map(|entry| {
                let uses = entry.value().uses;
                (
                    uses,
                    Suggestion {
                        title: entry.value().query.clone(),
                        description: format!("planned {} time(s) before", uses),
                        confidence: (uses as f64 / (uses as f64 + 1.0)).clamp(0.0, 0.95),
                        tags: entry.value().tags.clone(),
                    },
                )
            })
            .collect();
        hits.sort_by(|(ua, sa), (ub, sb)| ub.cmp(ua).then_with(|| sa.title.cmp(&sb.title)));
        hits.into_iter().map(|(_, s)| s).take(5).collect()
    }

    /// Acknowledge feedback and fold it into confidence calibration
    /// asynchronously; never blocks the caller on the learning loop.
    pub fn submit_feedback(
        &self,
        flow_id: Uuid,
        rating: f64,
        performance: PerformanceMetrics,
    ) -> Result<FeedbackAck> {
        if !(0.0..=1.0).contains(&rating) {
            return Err(OrchestratorError::Validation(format!(
                "rating must be in [0, 1], got {}",
                rating
            )));
        }
        self.inner
            .telemetry
            .emit(TelemetryEvent::FeedbackReceived { flow_id, rating });
        debug!(%flow_id, rating, ?performance, "feedback received");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            recalibrate(&inner, rating);
        });
        Ok(FeedbackAck {
            flow_id,
            accepted: true,
        })
    }

    /// List workflow templates, most popular first.
    pub fn list_templates(
        &self,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<TemplateSummary> {
        let mut templates: Vec<TemplateSummary> = self
            .inner
            .templates
            .iter()
            .map(|t| t.value().clone())
            .filter(|t| category.map_or(true, |c| t.category == c))
            .collect();
        templates.sort_by(|a, b| b.popularity.cmp(&a.popularity).then_with(|| a.id.cmp(&b.id)));
        templates.truncate(limit.unwrap_or(20));
        templates
    }

    /// Try out a generated code snippet in a one-shot sandbox session.
    ///
    /// The boundary contract: `{code, language}` in, `{stdout, stderr,
    /// exit status}` out; violations come back as outcome data and host
    /// stack traces never cross.
    pub async fn execute_snippet(
        &self,
        code: &str,
        language: CodeLanguage,
        level: SecurityLevel,
    ) -> Result<ExecutionOutcome> {
        let session = self.inner.sandbox.create(SandboxConfig::for_level(level))?;
        let result = self
            .inner
            .sandbox
            .execute(session, ExecutionTask::new(code, language))
            .await;
        // Violation and timeout paths already destroyed the session.
        let _ = self.inner.sandbox.destroy(session);
        let outcome = result?;
        self.inner.telemetry.emit(TelemetryEvent::SandboxExecuted {
            success: outcome.success,
            violations: outcome.security_violations.len(),
        });
        Ok(outcome)
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            generations: self.inner.metrics.generations.load(Ordering::Relaxed),
            cache_hits: self.inner.metrics.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.metrics.cache_misses.load(Ordering::Relaxed),
            clarifications: self.inner.metrics.clarifications.load(Ordering::Relaxed),
        }
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.inner.cache.metrics()
    }

    /// The full generation pipeline; runs at most once per fingerprint at
    /// a time (single-flight).
    async fn generate_plan(
        &self,
        request: OrchestrationRequest,
        extracted: ExtractedIntent,
        key: String,
        digest: String,
    ) -> Result<OrchestrationResponse> {
        self.inner.metrics.generations.fetch_add(1, Ordering::Relaxed);
        let catalog = self.inner.catalog.snapshot();
        let config = &self.inner.config;

        let criteria = SelectionCriteria::from_intent(&extracted.intent, &request.constraints);
        let mut selection = self.inner.registry.select(&criteria, &config.router)?;
        let mut generated =
            self.inner
                .generator
                .generate(&extracted.intent, &catalog, &selection);
        let (mut optimized, mut report) = optimize(&generated.graph, &config.optimizer);
        let (mut cost, mut latency) =
            estimate(&optimized, &selection.primary, &config.estimates);

        // Budget repair: if the estimate blows the ceiling and a cheaper
        // eligible model exists, replan with the cheapest one.
        let mut warnings = Vec::new();
        if let Some(budget) = request.constraints.max_cost {
            if cost > budget {
                if let Some(cheapest) = cheapest_model(&selection) {
                    if cheapest.model_id != selection.primary.model_id {
                        debug!(model = %cheapest.model_id, "replanning with cheapest model to meet budget");
                        selection = ModelSelection {
                            primary: cheapest,
                            ranked: selection.ranked.clone(),
                            certainty: selection.certainty,
                        };
                        generated =
                            self.inner
                                .generator
                                .generate(&extracted.intent, &catalog, &selection);
                        let replanned = optimize(&generated.graph, &config.optimizer);
                        optimized = replanned.0;
                        report = replanned.1;
                        let re = estimate(&optimized, &selection.primary, &config.estimates);
                        cost = re.0;
                        latency = re.1;
                    }
                }
                if cost > budget {
                    warnings.push(format!(
                        "estimated cost {:.4} exceeds ceiling {:.4} even with the cheapest eligible model",
                        cost, budget
                    ));
                }
            }
        }

        let validation = validate(&optimized);
        if !validation.valid {
            // Generated graphs should always validate; surface anything
            // unexpected as warnings rather than failing the plan.
            warn!(issues = validation.issues.len(), "generated flow failed validation");
            warnings.extend(validation.issues.iter().map(|i| i.message.clone()));
        }
        if let Some(max_latency) = request.constraints.max_latency_ms {
            if latency > max_latency {
                warnings.push(format!(
                    "estimated latency {}ms exceeds ceiling {}ms",
                    latency, max_latency
                ));
            }
        }

        let flow_id = Uuid::new_v4();
        let record = FlowRecord {
            id: flow_id,
            name: flow_name(&request.query),
            query: request.query.clone(),
            graph: optimized.clone(),
            created_at: Utc::now(),
        };
        self.inner
            .store
            .save(record)
            .await
            .map_err(|e| OrchestratorError::Persistence(e.to_string()))?;

        self.record_history(&request.query, &generated);

        let confidence = self.confidence(&extracted, &selection, &generated);
        let alternatives = self.alternatives(&optimized, &selection, generated.shape);
        let explanation = explanation(&extracted, &selection, &optimized, &generated);

        let response = OrchestrationResponse {
            flow_id,
            flow: optimized,
            explanation,
            confidence,
            estimated_cost: cost,
            estimated_latency_ms: latency,
            metadata: ResponseMetadata {
                components_used: generated.components_used.clone(),
                models_selected: selection
                    .ranked
                    .iter()
                    .take(3)
                    .map(|s| s.model.model_id.clone())
                    .collect(),
                security_checks: vec![
                    "request-validation".to_string(),
                    "model-capability-filter".to_string(),
                    "graph-structure-validation".to_string(),
                ],
                warnings,
                capability_gaps: generated.capability_gaps.clone(),
            },
            alternatives,
            needs_clarification: false,
            questions: Vec::new(),
        };

        info!(
            %flow_id,
            shape = %generated.shape,
            nodes = response.flow.node_count(),
            removed = report.removed_nodes,
            cost,
            "orchestration complete"
        );
        self.inner.telemetry.emit(TelemetryEvent::OrchestrationCompleted {
            flow_id,
            workflow_type: generated.shape.to_string(),
            estimated_cost: cost,
            cache_hit: false,
        });

        self.inner.cache.insert(key, digest, response.clone());
        Ok(response)
    }

    fn record_history(&self, query: &str, generated: &GeneratedFlow) {
        let normalized = normalize_query(query);
        self.inner
            .history
            .entry(normalized)
            .and_modify(|e| e.uses += 1)
            .or_insert_with(|| HistoryEntry {
                query: query.trim().to_string(),
                tags: generated.components_used.clone(),
                uses: 1,
            });
    }

    /// Confidence: capability-match completeness and model-selection
    /// certainty, weighted per [`crate::config::ConfidencePolicy`] and
    /// scaled by the feedback calibration factor.
    fn confidence(
        &self,
        extracted: &ExtractedIntent,
        selection: &ModelSelection,
        generated: &GeneratedFlow,
    ) -> f64 {
        let policy = &self.inner.config.confidence;
        let required = extracted.intent.required_capabilities.len();
        let capability_match = if required == 0 {
            1.0
        } else {
            1.0 - generated.capability_gaps.len() as f64 / required as f64
        };
        let raw = policy.capability_weight * capability_match
            + policy.model_weight * selection.certainty;
        let calibration = f64::from_bits(self.inner.calibration.load(Ordering::Relaxed));
        (raw * calibration).clamp(0.0, 1.0)
    }

    fn alternatives(
        &self,
        graph: &FlowGraph,
        selection: &ModelSelection,
        shape: WorkflowType,
    ) -> Vec<Alternative> {
        let policy = &self.inner.config.estimates;
        let mut alternatives = Vec::new();

        for scored in selection.ranked.iter().skip(1).take(2) {
            let (cost, latency) = estimate(graph, &scored.model, policy);
            alternatives.push(Alternative {
                label: format!("model:{}", scored.model.model_id),
                trade_off: trade_off_note(&selection.primary, &scored.model),
                estimated_cost: cost,
                estimated_latency_ms: latency,
            });
        }

        if shape != WorkflowType::Simple {
            let per_call = selection.primary.cost_per_call(policy.tokens_per_call_1k);
            alternatives.push(Alternative {
                label: "shape:simple".to_string(),
                trade_off:
                    "single model call; cheaper and faster, but no tool use or shared memory"
                        .to_string(),
                estimated_cost: per_call,
                estimated_latency_ms: selection.primary.avg_latency_ms
                    + 2 * policy.per_node_overhead_ms,
            });
        }
        alternatives
    }
}

fn validate_request(request: &OrchestrationRequest) -> Result<()> {
    if request.query.trim().is_empty() {
        return Err(OrchestratorError::Validation("query must not be empty".into()));
    }
    if let Some(max_cost) = request.constraints.max_cost {
        if !max_cost.is_finite() || max_cost < 0.0 {
            return Err(OrchestratorError::Validation(format!(
                "max_cost must be a non-negative number, got {}",
                max_cost
            )));
        }
    }
    if request.constraints.max_latency_ms == Some(0) {
        return Err(OrchestratorError::Validation(
            "max_latency_ms must be positive".into(),
        ));
    }
    Ok(())
}

fn clarification_response(questions: Vec<ClarificationQuestion>) -> OrchestrationResponse {
    OrchestrationResponse {
        flow_id: Uuid::new_v4(),
        flow: FlowGraph::new(),
        explanation: "The request is ambiguous; please answer the clarification questions and resubmit.".to_string(),
        confidence: 0.0,
        estimated_cost: 0.0,
        estimated_latency_ms: 0,
        metadata: ResponseMetadata::default(),
        alternatives: Vec::new(),
        needs_clarification: true,
        questions,
    }
}

fn model_backed(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Model { .. }
            | NodeKind::Agent { .. }
            | NodeKind::AgentLoop { .. }
            | NodeKind::Supervisor { .. }
    )
}

/// Cost: per-call model cost × model-backed node count. Latency: model
/// latency × model-backed nodes on the longest path (parallel fan-out
/// counted once) plus per-node overhead.
fn estimate(graph: &FlowGraph, model: &ModelDescriptor, policy: &EstimatePolicy) -> (f64, u64) {
    let model_nodes = graph
        .nodes
        .iter()
        .filter(|n| model_backed(&n.kind))
        .count();
    let cost = model.cost_per_call(policy.tokens_per_call_1k) * model_nodes as f64;

    let depth = longest_model_depth(graph);
    let latency = model.avg_latency_ms * depth as u64
        + policy.per_node_overhead_ms * graph.node_count() as u64;
    (cost, latency)
}

/// Longest path length counted in model-backed nodes. Cycle-guarded so an
/// agent-loop edge cannot recurse forever.
fn longest_model_depth(graph: &FlowGraph) -> usize {
    use std::collections::{HashMap, HashSet};

    fn depth_of(
        graph: &FlowGraph,
        id: &str,
        memo: &mut HashMap<String, usize>,
        on_stack: &mut HashSet<String>,
    ) -> usize {
        if let Some(d) = memo.get(id) {
            return *d;
        }
        if !on_stack.insert(id.to_string()) {
            return 0;
        }
        let own = graph
            .node(id)
            .map(|n| usize::from(model_backed(&n.kind)))
            .unwrap_or(0);
        let downstream = graph
            .successors(id)
            .into_iter()
            .map(|s| {
                let s = s.to_string();
                depth_of(graph, &s, memo, on_stack)
            })
            .max()
            .unwrap_or(0);
        on_stack.remove(id);
        memo.insert(id.to_string(), own + downstream);
        own + downstream
    }

    let mut memo = HashMap::new();
    let mut on_stack = HashSet::new();
    graph
        .nodes
        .iter()
        .map(|n| depth_of(graph, &n.id, &mut memo, &mut on_stack))
        .max()
        .unwrap_or(0)
}

fn cheapest_model(selection: &ModelSelection) -> Option<Arc<ModelDescriptor>> {
    selection
        .ranked
        .iter()
        .min_by(|a, b| {
            a.model
                .cost_per_call(1.0)
                .partial_cmp(&b.model.cost_per_call(1.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|s| s.model.clone())
}

fn trade_off_note(primary: &ModelDescriptor, other: &ModelDescriptor) -> String {
    let cheaper = other.cost_per_call(1.0) < primary.cost_per_call(1.0);
    let faster = other.avg_latency_ms < primary.avg_latency_ms;
    match (cheaper, faster) {
        (true, true) => "cheaper and faster, typically at a lower quality tier".to_string(),
        (true, false) => "cheaper per call but slower".to_string(),
        (false, true) => "faster but costs more per call".to_string(),
        (false, false) => "higher quality tier at higher cost and latency".to_string(),
    }
}

fn shape_of(flow: &FlowGraph) -> &'static str {
    if flow
        .nodes
        .iter()
        .any(|n| matches!(n.kind, NodeKind::Supervisor { .. }))
    {
        "multi-agent"
    } else if flow
        .nodes
        .iter()
        .any(|n| matches!(n.kind, NodeKind::Agent { .. } | NodeKind::AgentLoop { .. }))
    {
        "agent"
    } else {
        "simple"
    }
}

fn flow_name(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.len() <= 48 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(48).collect();
        format!("{}…", cut.trim_end())
    }
}

fn explanation(
    extracted: &ExtractedIntent,
    selection: &ModelSelection,
    graph: &FlowGraph,
    generated: &GeneratedFlow,
) -> String {
    let mut text = format!(
        "Planned a {} workflow with {} nodes around {} for: {}.",
        generated.shape,
        graph.node_count(),
        selection.primary.model_id,
        extracted.intent.primary_goal
    );
    if !generated.components_used.is_empty() {
        text.push_str(&format!(
            " Components: {}.",
            generated.components_used.join(", ")
        ));
    }
    if !generated.capability_gaps.is_empty() {
        let gaps: Vec<&str> = generated
            .capability_gaps
            .iter()
            .map(|g| g.requested.as_str())
            .collect();
        text.push_str(&format!(
            " No catalog component currently covers: {}; the plan degrades gracefully there.",
            gaps.join(", ")
        ));
    }
    text
}

fn recalibrate(inner: &Inner, rating: f64) {
    // Ratings map into a calibration factor in [0.5, 1.1]; an EWMA keeps
    // single outliers from swinging confidence.
    let alpha = inner.config.confidence.calibration_alpha;
    let target = 0.5 + 0.6 * rating;
    loop {
        let current_bits = inner.calibration.load(Ordering::Relaxed);
        let current = f64::from_bits(current_bits);
        let next = current * (1.0 - alpha) + target * alpha;
        if inner
            .calibration
            .compare_exchange(
                current_bits,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            break;
        }
    }
}

fn seed_templates() -> DashMap<String, TemplateSummary> {
    let templates = DashMap::new();
    for template in [
        TemplateSummary {
            id: "qa-bot".into(),
            name: "Q&A Bot".into(),
            description: "Single-model question answering over a prompt".into(),
            category: "conversation".into(),
            popularity: 120,
        },
        TemplateSummary {
            id: "document-pipeline".into(),
            name: "Document Pipeline".into(),
            description: "Load, analyze, and summarize documents".into(),
            category: "documents".into(),
            popularity: 95,
        },
        TemplateSummary {
            id: "research-agent".into(),
            name: "Research Agent".into(),
            description: "Web-searching agent with memory".into(),
            category: "research".into(),
            popularity: 74,
        },
        TemplateSummary {
            id: "support-triage".into(),
            name: "Support Triage Crew".into(),
            description: "Supervisor routing tickets to specialist agents".into(),
            category: "conversation".into(),
            popularity: 41,
        },
    ] {
        templates.insert(template.id.clone(), template);
    }
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatePolicy;
    use flowgraph_core::FlowNode;

    fn model_desc() -> ModelDescriptor {
        ModelDescriptor::new("swift-mini", "acme")
            .with_costs(0.001, 0.002)
            .with_latency_ms(200)
    }

    #[test]
    fn test_estimate_counts_model_backed_nodes() {
        let mut graph = FlowGraph::new();
        graph.add_node(FlowNode::new(
            "supervisor-1",
            NodeKind::Supervisor {
                model_id: "m".into(),
            },
        ));
        graph.add_node(FlowNode::new(
            "specialist-a",
            NodeKind::Agent {
                model_id: "m".into(),
            },
        ));
        graph.add_node(FlowNode::new(
            "specialist-b",
            NodeKind::Agent {
                model_id: "m".into(),
            },
        ));
        graph.add_node(FlowNode::new(
            "output-1",
            NodeKind::Output {
                format: "text".into(),
            },
        ));
        graph.add_edge("supervisor-1", "specialist-a");
        graph.add_edge("supervisor-1", "specialist-b");
        graph.add_edge("specialist-a", "output-1");
        graph.add_edge("specialist-b", "output-1");

        let policy = EstimatePolicy::default();
        let (cost, latency) = estimate(&graph, &model_desc(), &policy);
        // Three model-backed nodes pay cost; the parallel fan-out counts
        // once in latency depth (supervisor + one specialist).
        assert!((cost - 0.003 * 2.0 * 3.0).abs() < 1e-9);
        assert_eq!(latency, 200 * 2 + policy.per_node_overhead_ms * 4);
    }

    #[test]
    fn test_flow_name_truncates() {
        assert_eq!(flow_name("short"), "short");
        let long = "x".repeat(100);
        assert!(flow_name(&long).chars().count() <= 49);
    }

    #[test]
    fn test_shape_detection() {
        let mut graph = FlowGraph::new();
        graph.add_node(FlowNode::new(
            "model-1",
            NodeKind::Model {
                model_id: "m".into(),
                provider: "p".into(),
            },
        ));
        assert_eq!(shape_of(&graph), "simple");
        graph.add_node(FlowNode::new(
            "agent-1",
            NodeKind::Agent {
                model_id: "m".into(),
            },
        ));
        assert_eq!(shape_of(&graph), "agent");
    }

    #[test]
    fn test_validate_request_rejects_bad_input() {
        assert!(validate_request(&OrchestrationRequest::new("   ")).is_err());
        let mut request = OrchestrationRequest::new("ok");
        request.constraints.max_cost = Some(-1.0);
        assert!(validate_request(&request).is_err());
        request.constraints.max_cost = Some(f64::NAN);
        assert!(validate_request(&request).is_err());
    }
}
