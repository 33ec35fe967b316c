//! Error types for graph construction and serialization.

use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by graph construction helpers.
///
/// Structural validation problems are intentionally *not* represented here;
/// they are reported as data via [`crate::validate::ValidationReport`].
#[derive(Debug, Error)]
pub enum GraphError {
    /// A construction invariant was violated (e.g. duplicate node id passed
    /// to a builder that requires uniqueness).
    #[error("Graph construction failed: {0}")]
    Construction(String),

    /// JSON serialization/deserialization of a graph failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
