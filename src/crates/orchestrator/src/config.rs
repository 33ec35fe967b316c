//! Engine configuration.
//!
//! Every tunable policy in the engine lives here rather than as a constant
//! buried in code: router ranking weights, the confidence formula, the
//! clarification trigger, cache TTL, catalog debounce/backoff, and the
//! assumptions behind cost/latency estimates. Load from TOML, override the
//! common knobs from the environment, or build in code with the `with_*`
//! setters.

use std::path::Path;
use std::time::Duration;

use flowgraph_core::OptimizeOptions;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{OrchestratorError, Result};

/// Weights of the model-ranking score.
///
/// `score = capability_match·w_cap + cost_score·w_cost +
/// latency_score·w_latency + tier_fit·w_tier (+ preference bonus)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterWeights {
    pub capability_match: f64,
    pub cost: f64,
    pub latency: f64,
    pub tier_fit: f64,
    /// Bonus for models named in `constraints.preferred_models`.
    pub preference_bonus: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            capability_match: 2.0,
            cost: 1.0,
            latency: 0.5,
            tier_fit: 0.75,
            preference_bonus: 0.25,
        }
    }
}

/// When the engine asks for clarification instead of planning.
///
/// A request with no clarifications is ambiguous when it carries fewer than
/// `min_capability_signals` capability keywords, when the top two workflow
/// type scores are within `ambiguity_margin` of each other, or when a
/// data-consuming capability appears with no recognizable data source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentPolicy {
    pub min_capability_signals: usize,
    pub ambiguity_margin: f64,
}

impl Default for IntentPolicy {
    fn default() -> Self {
        Self {
            min_capability_signals: 2,
            ambiguity_margin: 0.15,
        }
    }
}

/// The confidence formula:
/// `clamp01((capability_match·capability_weight + selection_certainty·
/// model_weight) · feedback_calibration)`.
///
/// Capability match is the fraction of required capabilities the catalog
/// satisfied; selection certainty is the router's score margin between the
/// chosen model and the runner-up; calibration is an EWMA over submitted
/// feedback ratings, starting at 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidencePolicy {
    pub capability_weight: f64,
    pub model_weight: f64,
    /// EWMA smoothing factor for feedback calibration.
    pub calibration_alpha: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            capability_weight: 0.6,
            model_weight: 0.4,
            calibration_alpha: 0.2,
        }
    }
}

/// Response cache sizing and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1024,
        }
    }
}

/// Catalog rebuild debounce and retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Quiet window after a change notification before rebuilding.
    pub debounce: Duration,
    pub rebuild_attempts: usize,
    /// Initial retry interval in seconds.
    pub backoff_initial: f64,
    pub backoff_factor: f64,
    /// Retry interval ceiling in seconds.
    pub backoff_max: f64,
    pub jitter: bool,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            rebuild_attempts: 5,
            backoff_initial: 0.5,
            backoff_factor: 2.0,
            backoff_max: 30.0,
            jitter: true,
        }
    }
}

/// Assumptions behind cost and latency estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatePolicy {
    /// Assumed token volume per model call, in thousands.
    pub tokens_per_call_1k: f64,
    /// Fixed overhead per graph node.
    pub per_node_overhead_ms: u64,
}

impl Default for EstimatePolicy {
    fn default() -> Self {
        Self {
            tokens_per_call_1k: 2.0,
            per_node_overhead_ms: 20,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterWeights,
    pub intent: IntentPolicy,
    pub confidence: ConfidencePolicy,
    pub cache: CacheSettings,
    pub catalog: CatalogSettings,
    pub estimates: EstimatePolicy,
    pub optimizer: OptimizeOptions,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| OrchestratorError::Validation(format!("invalid config: {}", e)))
    }

    /// Load from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrchestratorError::Validation(format!(
                "cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply environment overrides for the commonly tuned knobs:
    /// `FLOWFORGE_CACHE_TTL_SECS`, `FLOWFORGE_MIN_CAPABILITY_SIGNALS`,
    /// `FLOWFORGE_AMBIGUITY_MARGIN`. Malformed values are ignored with a
    /// warning.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(ttl) = read_env_parsed::<u64>("FLOWFORGE_CACHE_TTL_SECS") {
            self.cache.ttl = Duration::from_secs(ttl);
        }
        if let Some(min) = read_env_parsed::<usize>("FLOWFORGE_MIN_CAPABILITY_SIGNALS") {
            self.intent.min_capability_signals = min;
        }
        if let Some(margin) = read_env_parsed::<f64>("FLOWFORGE_AMBIGUITY_MARGIN") {
            self.intent.ambiguity_margin = margin;
        }
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    pub fn with_router_weights(mut self, weights: RouterWeights) -> Self {
        self.router = weights;
        self
    }

    pub fn with_intent_policy(mut self, policy: IntentPolicy) -> Self {
        self.intent = policy;
        self
    }
}

fn read_env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring malformed {}={}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.intent.min_capability_signals, 2);
        assert!(config.confidence.capability_weight + config.confidence.model_weight > 0.99);
        assert!(config.cache.ttl >= Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [intent]
            min_capability_signals = 3

            [router]
            cost = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.intent.min_capability_signals, 3);
        assert_eq!(config.router.cost, 2.5);
        // Untouched sections keep defaults.
        assert_eq!(config.router.capability_match, 2.0);
        assert_eq!(config.cache.max_entries, 1024);
    }

    #[test]
    fn test_invalid_toml_is_a_validation_error() {
        let err = EngineConfig::from_toml_str("not [valid").unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
