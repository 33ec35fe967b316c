//! Workflow graph model for flowforge.
//!
//! This crate defines the compiled representation of a planned workflow -
//! a directed graph of typed processing nodes connected by data-dependency
//! edges - together with structural validation and graph optimization
//! passes. It is the leaf crate of the workspace: the orchestrator builds
//! graphs out of these types, and downstream runtimes consume them.
//!
//! Structural problems are data, not faults: [`validate`] returns a report
//! of typed issues rather than erroring, so callers can attach them to a
//! response as warnings.

pub mod error;
pub mod graph;
pub mod optimize;
pub mod validate;

pub use error::{GraphError, Result};
pub use graph::{FlowEdge, FlowGraph, FlowNode, NodeKind, Position};
pub use optimize::{optimize, CountDelta, OptimizeOptions, OptimizeReport};
pub use validate::{validate, IssueCode, ValidationIssue, ValidationReport};
