//! Orchestration planning engine for flowforge.
//!
//! This crate turns a natural-language capability request plus numeric and
//! policy constraints into a validated, executable workflow graph:
//!
//! - [`catalog`] - capability catalog with atomic snapshots and a debounced
//!   background rebuilder
//! - [`intent`] - keyword-driven intent extraction and the clarification
//!   dialogue
//! - [`router`] - model registry and constraint-aware model selection
//! - [`generator`] - deterministic flow-graph generation with explicit
//!   capability-gap reporting
//! - [`cache`] / [`singleflight`] - fingerprint-keyed response cache and
//!   per-fingerprint single-flight generation
//! - [`engine`] - the meta-orchestrator coordinating all of the above
//! - [`eval`] - benchmark harness for calibrating router weights
//!
//! The graph model and optimizer live in `flowgraph-core`; isolated
//! execution of generated code lives in `sandbox`.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod eval;
pub mod generator;
pub mod intent;
pub mod router;
pub mod singleflight;
pub mod stores;
pub mod types;

use thiserror::Error;

pub use cache::ResponseCache;
pub use catalog::{Capability, CapabilityCatalog, CatalogService, ComponentRegistry};
pub use config::EngineConfig;
pub use engine::MetaOrchestrator;
pub use eval::{Benchmark, EvaluationPipeline, ModelInvoker};
pub use generator::FlowGenerator;
pub use intent::IntentExtractor;
pub use router::{ModelDescriptor, ModelRegistry, SelectionCriteria};
pub use stores::{FlowRecord, FlowStore, TelemetryEvent, TelemetrySink};
pub use types::{
    Constraints, OrchestrationRequest, OrchestrationResponse, WorkflowType,
};

/// Convenience result type using [`OrchestratorError`].
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the orchestration engine.
///
/// `Clone` so a failure can be delivered to every caller joined on the same
/// single-flight generation.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Malformed request: missing query, malformed constraints. Surfaced
    /// immediately, never retried.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Zero models satisfy the mandatory capability filter.
    #[error("No eligible model satisfies required capabilities: {required:?}")]
    NoEligibleModel { required: Vec<String> },

    /// A bounded wait elapsed.
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Component registry scan failed; reads continue from the last-good
    /// snapshot while the rebuilder retries.
    #[error("Catalog rebuild failed: {0}")]
    Catalog(String),

    /// Flow persistence collaborator failed.
    #[error("Flow persistence failed: {0}")]
    Persistence(String),

    /// Sandbox lifecycle or execution error.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] sandbox::SandboxError),

    /// Unexpected internal failure (serialization, graph construction).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<flowgraph_core::GraphError> for OrchestratorError {
    fn from(err: flowgraph_core::GraphError) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
