//! Model registry and constraint-aware model selection.
//!
//! Selection is a hard filter followed by a soft ranking. The filter keeps
//! models whose capability flags are a superset of the required set (and
//! that are local, when the request demands it); zero survivors is the one
//! hard failure, `NoEligibleModel`. Ranking weighs capability-match
//! completeness, inverse cost, inverse latency, and complexity-tier fit
//! with the configurable [`RouterWeights`]; cost and latency preferences
//! never eliminate the only eligible candidate. Ties break toward lower
//! latency.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RouterWeights;
use crate::types::{Complexity, Constraints, Intent, WorkflowType};
use crate::{OrchestratorError, Result};

/// Capability flags a model can advertise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFlags {
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
}

impl ModelFlags {
    /// Whether the named capability flag is set.
    pub fn supports(&self, capability: &str) -> bool {
        match capability {
            "streaming" => self.streaming,
            "function-calling" => self.function_calling,
            "vision" => self.vision,
            _ => false,
        }
    }

    fn count(&self) -> usize {
        [self.streaming, self.function_calling, self.vision]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

/// Metadata describing one routable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub provider: String,
    #[serde(default)]
    pub flags: ModelFlags,
    /// Cost per 1k input units.
    pub input_cost_per_1k: f64,
    /// Cost per 1k output units.
    pub output_cost_per_1k: f64,
    /// Observed average latency of one call.
    pub avg_latency_ms: u64,
    /// Capability tier, 1 (light) to 3 (frontier).
    pub quality_tier: u8,
    /// Locally hosted (no data leaves the machine).
    #[serde(default)]
    pub local: bool,
}

impl ModelDescriptor {
    pub fn new(model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            provider: provider.into(),
            flags: ModelFlags::default(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            avg_latency_ms: 500,
            quality_tier: 2,
            local: false,
        }
    }

    pub fn with_flags(mut self, flags: ModelFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_costs(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    pub fn with_latency_ms(mut self, latency: u64) -> Self {
        self.avg_latency_ms = latency;
        self
    }

    pub fn with_tier(mut self, tier: u8) -> Self {
        self.quality_tier = tier;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Estimated cost of one call at the given token volume (thousands).
    pub fn cost_per_call(&self, tokens_1k: f64) -> f64 {
        (self.input_cost_per_1k + self.output_cost_per_1k) * tokens_1k
    }
}

/// What the router selects against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    /// Required model capability flags (hard filter).
    pub capabilities: BTreeSet<String>,
    pub complexity: Complexity,
    pub max_cost: Option<f64>,
    pub max_latency_ms: Option<u64>,
    pub preferred_models: Vec<String>,
    pub require_local: bool,
}

impl SelectionCriteria {
    /// Derive criteria from an extracted intent plus request constraints.
    ///
    /// Agentic shapes need function calling; a vision capability requires a
    /// vision-capable model; a streaming requirement needs streaming.
    pub fn from_intent(intent: &Intent, constraints: &Constraints) -> Self {
        let mut capabilities = BTreeSet::new();
        if matches!(
            intent.workflow_type,
            WorkflowType::Agent | WorkflowType::MultiAgent
        ) {
            capabilities.insert("function-calling".to_string());
        }
        if intent.required_capabilities.contains("vision") {
            capabilities.insert("vision".to_string());
        }
        if intent.special_requirements.contains("streaming") {
            capabilities.insert("streaming".to_string());
        }
        Self {
            capabilities,
            complexity: intent.complexity,
            max_cost: constraints.max_cost,
            max_latency_ms: constraints.max_latency_ms,
            preferred_models: constraints.preferred_models.clone(),
            require_local: constraints.require_local
                || intent.special_requirements.contains("local-models"),
        }
    }
}

/// A ranked candidate.
#[derive(Debug, Clone)]
pub struct ScoredModel {
    pub model: Arc<ModelDescriptor>,
    pub score: f64,
}

/// The router's answer: a primary model plus the full ranking.
#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub primary: Arc<ModelDescriptor>,
    pub ranked: Vec<ScoredModel>,
    /// Normalized score margin between the top two candidates; 1.0 when
    /// only one candidate exists. Feeds the confidence formula.
    pub certainty: f64,
}

/// Registry of routable models. Read-mostly; refreshed out of band by
/// provider telemetry.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<Vec<Arc<ModelDescriptor>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a model by id.
    pub fn register(&self, descriptor: ModelDescriptor) {
        let mut models = self.models.write();
        models.retain(|m| m.model_id != descriptor.model_id);
        models.push(Arc::new(descriptor));
    }

    /// Current registry snapshot.
    pub fn list_models(&self) -> Vec<Arc<ModelDescriptor>> {
        self.models.read().clone()
    }

    /// Select models for the criteria. See the module docs for semantics.
    pub fn select(
        &self,
        criteria: &SelectionCriteria,
        weights: &RouterWeights,
    ) -> Result<ModelSelection> {
        let eligible: Vec<Arc<ModelDescriptor>> = self
            .list_models()
            .into_iter()
            .filter(|m| {
                criteria.capabilities.iter().all(|c| m.flags.supports(c))
                    && (!criteria.require_local || m.local)
            })
            .collect();

        if eligible.is_empty() {
            let mut required: Vec<String> = criteria.capabilities.iter().cloned().collect();
            if criteria.require_local {
                required.push("local".to_string());
            }
            return Err(OrchestratorError::NoEligibleModel { required });
        }

        // Cost ceiling is soft: restrict to in-budget models only when some
        // exist, so the preference never empties the candidate set.
        let budget_call_cost = 1.0; // token volume proxy for per-call budget fit
        let candidates: Vec<Arc<ModelDescriptor>> = match criteria.max_cost {
            Some(budget) => {
                let in_budget: Vec<_> = eligible
                    .iter()
                    .filter(|m| m.cost_per_call(budget_call_cost) <= budget)
                    .cloned()
                    .collect();
                if in_budget.is_empty() {
                    eligible
                } else {
                    in_budget
                }
            }
            None => eligible,
        };

        let mut ranked: Vec<ScoredModel> = candidates
            .into_iter()
            .map(|model| {
                let score = self.score(&model, criteria, weights);
                ScoredModel { model, score }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.avg_latency_ms.cmp(&b.model.avg_latency_ms))
                .then_with(|| a.model.model_id.cmp(&b.model.model_id))
        });

        let certainty = match ranked.as_slice() {
            [_] => 1.0,
            [first, second, ..] if first.score > 0.0 => {
                ((first.score - second.score) / first.score).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        let primary = ranked[0].model.clone();
        debug!(model = %primary.model_id, certainty, "model selected");
        Ok(ModelSelection {
            primary,
            ranked,
            certainty,
        })
    }

    fn score(
        &self,
        model: &ModelDescriptor,
        criteria: &SelectionCriteria,
        weights: &RouterWeights,
    ) -> f64 {
        // Completeness: required flags are all present (hard filter), extra
        // flags add headroom.
        let required = criteria.capabilities.len().max(1) as f64;
        let matched = criteria
            .capabilities
            .iter()
            .filter(|c| model.flags.supports(c))
            .count() as f64;
        let extra = model.flags.count() as f64 - matched;
        let capability_match = matched / required + 0.05 * extra.max(0.0);

        let cost_score = 1.0 / (1.0 + model.cost_per_call(1.0));
        let latency_score = 1.0 / (1.0 + model.avg_latency_ms as f64 / 1000.0);

        // Higher complexity favors higher tiers; the ideal tier tracks the
        // complexity level.
        let ideal_tier = match criteria.complexity {
            Complexity::Low => 1.0,
            Complexity::Medium => 2.0,
            Complexity::High => 3.0,
        };
        let tier_fit = 1.0 - (model.quality_tier as f64 - ideal_tier).abs() / 2.0;

        let mut score = weights.capability_match * capability_match
            + weights.cost * cost_score
            + weights.latency * latency_score
            + weights.tier_fit * tier_fit.max(0.0);

        if let Some(rank) = criteria
            .preferred_models
            .iter()
            .position(|p| p == &model.model_id)
        {
            score += weights.preference_bonus / (rank + 1) as f64;
        }
        if let Some(max_latency) = criteria.max_latency_ms {
            if model.avg_latency_ms > max_latency {
                score -= weights.latency;
            }
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> RouterWeights {
        RouterWeights::default()
    }

    fn criteria() -> SelectionCriteria {
        SelectionCriteria {
            capabilities: BTreeSet::new(),
            complexity: Complexity::Low,
            max_cost: None,
            max_latency_ms: None,
            preferred_models: Vec::new(),
            require_local: false,
        }
    }

    fn seeded_registry() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry.register(
            ModelDescriptor::new("swift-mini", "acme")
                .with_flags(ModelFlags {
                    streaming: true,
                    function_calling: false,
                    vision: false,
                })
                .with_costs(0.001, 0.002)
                .with_latency_ms(200)
                .with_tier(1),
        );
        registry.register(
            ModelDescriptor::new("atlas-pro", "acme")
                .with_flags(ModelFlags {
                    streaming: true,
                    function_calling: true,
                    vision: true,
                })
                .with_costs(0.01, 0.03)
                .with_latency_ms(900)
                .with_tier(3),
        );
        registry.register(
            ModelDescriptor::new("hermit-7b", "selfhost")
                .with_flags(ModelFlags {
                    streaming: false,
                    function_calling: true,
                    vision: false,
                })
                .with_costs(0.0, 0.0)
                .with_latency_ms(1500)
                .with_tier(1)
                .local(),
        );
        registry
    }

    #[test]
    fn test_capability_filter_is_hard() {
        let registry = seeded_registry();
        let mut c = criteria();
        c.capabilities.insert("vision".into());

        let selection = registry.select(&c, &weights()).unwrap();
        assert_eq!(selection.primary.model_id, "atlas-pro");
        assert_eq!(selection.ranked.len(), 1);
        assert_eq!(selection.certainty, 1.0);
    }

    #[test]
    fn test_no_eligible_model_when_filter_empties() {
        let registry = ModelRegistry::new();
        registry.register(ModelDescriptor::new("swift-mini", "acme"));
        let mut c = criteria();
        c.capabilities.insert("vision".into());

        let err = registry.select(&c, &weights()).unwrap_err();
        match err {
            OrchestratorError::NoEligibleModel { required } => {
                assert_eq!(required, vec!["vision".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_low_complexity_prefers_cheap_fast_model() {
        let registry = seeded_registry();
        let selection = registry.select(&criteria(), &weights()).unwrap();
        assert_eq!(selection.primary.model_id, "swift-mini");
    }

    #[test]
    fn test_high_complexity_shifts_toward_frontier_tier() {
        let registry = seeded_registry();
        let mut c = criteria();
        c.complexity = Complexity::High;
        c.capabilities.insert("function-calling".into());

        let selection = registry.select(&c, &weights()).unwrap();
        assert_eq!(selection.primary.model_id, "atlas-pro");
    }

    #[test]
    fn test_cost_ceiling_never_eliminates_only_candidate() {
        let registry = ModelRegistry::new();
        registry.register(
            ModelDescriptor::new("atlas-pro", "acme")
                .with_flags(ModelFlags {
                    streaming: false,
                    function_calling: true,
                    vision: false,
                })
                .with_costs(1.0, 2.0),
        );
        let mut c = criteria();
        c.capabilities.insert("function-calling".into());
        c.max_cost = Some(0.001);

        // Over budget, but still the only eligible model: selection succeeds.
        let selection = registry.select(&c, &weights()).unwrap();
        assert_eq!(selection.primary.model_id, "atlas-pro");
    }

    #[test]
    fn test_budget_prefers_in_budget_models() {
        let registry = seeded_registry();
        let mut c = criteria();
        c.complexity = Complexity::High; // would otherwise favor atlas-pro
        c.max_cost = Some(0.01);

        let selection = registry.select(&c, &weights()).unwrap();
        assert_ne!(selection.primary.model_id, "atlas-pro");
    }

    #[test]
    fn test_require_local_filters_remote_models() {
        let registry = seeded_registry();
        let mut c = criteria();
        c.require_local = true;

        let selection = registry.select(&c, &weights()).unwrap();
        assert_eq!(selection.primary.model_id, "hermit-7b");
    }

    #[test]
    fn test_preferred_models_get_a_boost() {
        let registry = seeded_registry();
        let mut c = criteria();
        c.complexity = Complexity::Medium;
        c.preferred_models = vec!["atlas-pro".into()];

        let selection = registry.select(&c, &weights()).unwrap();
        let atlas_rank = selection
            .ranked
            .iter()
            .position(|s| s.model.model_id == "atlas-pro")
            .unwrap();
        let mut c_no_pref = c.clone();
        c_no_pref.preferred_models.clear();
        let baseline = registry.select(&c_no_pref, &weights()).unwrap();
        let baseline_rank = baseline
            .ranked
            .iter()
            .position(|s| s.model.model_id == "atlas-pro")
            .unwrap();
        assert!(atlas_rank <= baseline_rank);
    }

    #[test]
    fn test_register_replaces_by_id() {
        let registry = ModelRegistry::new();
        registry.register(ModelDescriptor::new("swift-mini", "acme").with_tier(1));
        registry.register(ModelDescriptor::new("swift-mini", "acme").with_tier(2));
        let models = registry.list_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].quality_tier, 2);
    }
}
