//! External collaborator seams: flow persistence and telemetry.
//!
//! Both are traits so deployments can plug in real backends; in-memory
//! implementations keep the engine runnable and testable on its own.
//! Telemetry is fire-and-forget by contract - a sink that fails or blocks
//! must never fail the orchestration path, so `emit` is synchronous,
//! infallible, and expected to be cheap (queue and return).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowgraph_core::FlowGraph;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted flow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: Uuid,
    pub name: String,
    pub query: String,
    pub graph: FlowGraph,
    pub created_at: DateTime<Utc>,
}

/// External collaborator: flow persistence.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn save(&self, record: FlowRecord) -> anyhow::Result<()>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<FlowRecord>>;
}

/// In-memory flow store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryFlowStore {
    records: DashMap<Uuid, FlowRecord>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn save(&self, record: FlowRecord) -> anyhow::Result<()> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<FlowRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }
}

/// Events the engine emits along the orchestration path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    OrchestrationCompleted {
        flow_id: Uuid,
        workflow_type: String,
        estimated_cost: f64,
        cache_hit: bool,
    },
    ClarificationRequested {
        questions: usize,
    },
    FeedbackReceived {
        flow_id: Uuid,
        rating: f64,
    },
    SandboxExecuted {
        success: bool,
        violations: usize,
    },
}

/// External collaborator: fire-and-forget telemetry sink.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that records events for assertions.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
