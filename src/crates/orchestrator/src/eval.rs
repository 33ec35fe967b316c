//! Evaluation pipeline.
//!
//! A benchmark harness that scores models against labeled tasks. Used to
//! calibrate router ranking weights offline; never on the request hot
//! path. Model invocation is an external collaborator behind
//! [`ModelInvoker`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{OrchestratorError, Result};

/// Scores one model output against expectations, in `[0, 1]`.
pub trait Scorer: Send + Sync {
    fn score(&self, prompt: &str, output: &str) -> f64;
}

/// A scoring function with its weight in the aggregate.
#[derive(Clone)]
pub struct WeightedScorer {
    pub weight: f64,
    pub scorer: Arc<dyn Scorer>,
}

/// A labeled benchmark task.
#[derive(Clone)]
pub struct Benchmark {
    pub id: String,
    pub prompt: String,
    pub category: String,
    pub expected_capabilities: Vec<String>,
    pub scorers: Vec<WeightedScorer>,
}

/// External collaborator: invokes a model with a prompt.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, model_id: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Per-benchmark outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub benchmark_id: String,
    pub category: String,
    pub score: f64,
}

/// Aggregated evaluation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model_id: String,
    /// Weighted mean over all benchmarks run.
    pub overall: f64,
    pub by_category: BTreeMap<String, f64>,
    pub results: Vec<BenchmarkResult>,
}

/// Benchmark registry plus the evaluation loop.
pub struct EvaluationPipeline {
    benchmarks: DashMap<String, Arc<Benchmark>>,
    invoker: Arc<dyn ModelInvoker>,
    invoke_timeout: Duration,
}

impl EvaluationPipeline {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            benchmarks: DashMap::new(),
            invoker,
            invoke_timeout: Duration::from_secs(30),
        }
    }

    /// Bound each model invocation; an overrun is a typed timeout failure,
    /// never an unbounded hang.
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Register (or replace) a benchmark.
    pub fn add_benchmark(&self, benchmark: Benchmark) {
        self.benchmarks
            .insert(benchmark.id.clone(), Arc::new(benchmark));
    }

    /// Run the named benchmarks against a model and aggregate scores.
    pub async fn evaluate(&self, model_id: &str, benchmark_ids: &[&str]) -> Result<EvaluationReport> {
        let mut results = Vec::with_capacity(benchmark_ids.len());
        let mut by_category: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        for id in benchmark_ids {
            let benchmark = self
                .benchmarks
                .get(*id)
                .map(|b| b.clone())
                .ok_or_else(|| {
                    OrchestratorError::Validation(format!("unknown benchmark '{}'", id))
                })?;

            let output =
                tokio::time::timeout(self.invoke_timeout, self.invoker.invoke(model_id, &benchmark.prompt))
                    .await
                    .map_err(|_| OrchestratorError::Timeout {
                        operation: format!("model invocation for benchmark '{}'", benchmark.id),
                        duration_ms: self.invoke_timeout.as_millis() as u64,
                    })?
                    .map_err(|e| OrchestratorError::Internal(format!("model invocation: {}", e)))?;

            let score = weighted_score(&benchmark, &output);
            debug!(benchmark = %benchmark.id, score, "benchmark scored");

            let slot = by_category.entry(benchmark.category.clone()).or_insert((0.0, 0));
            slot.0 += score;
            slot.1 += 1;
            results.push(BenchmarkResult {
                benchmark_id: benchmark.id.clone(),
                category: benchmark.category.clone(),
                score,
            });
        }

        let overall = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
        };
        Ok(EvaluationReport {
            model_id: model_id.to_string(),
            overall,
            by_category: by_category
                .into_iter()
                .map(|(category, (total, n))| (category, total / n as f64))
                .collect(),
            results,
        })
    }
}

fn weighted_score(benchmark: &Benchmark, output: &str) -> f64 {
    let total_weight: f64 = benchmark.scorers.iter().map(|s| s.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    benchmark
        .scorers
        .iter()
        .map(|s| s.weight * s.scorer.score(&benchmark.prompt, output).clamp(0.0, 1.0))
        .sum::<f64>()
        / total_weight
}

/// Scores 1.0 when the output contains the needle.
pub struct KeywordScorer {
    pub needle: String,
}

impl Scorer for KeywordScorer {
    fn score(&self, _prompt: &str, output: &str) -> f64 {
        if output.to_lowercase().contains(&self.needle.to_lowercase()) {
            1.0
        } else {
            0.0
        }
    }
}

/// Scores by output length relative to a target, penalizing rambling.
pub struct BrevityScorer {
    pub target_chars: usize,
}

impl Scorer for BrevityScorer {
    fn score(&self, _prompt: &str, output: &str) -> f64 {
        if output.is_empty() {
            return 0.0;
        }
        let ratio = output.len() as f64 / self.target_chars.max(1) as f64;
        (1.0 / ratio.max(1.0)).clamp(0.0, 1.0)
    }
}
