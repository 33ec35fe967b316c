//! Sandbox error types.
//!
//! Security violations are deliberately *not* an error variant: a screened
//! rejection is a normal outcome reported in
//! [`crate::exec::ExecutionOutcome::security_violations`].

use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionState;

/// Convenience result type using [`SandboxError`].
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised by sandbox lifecycle and execution.
///
/// `Clone` so an error outcome can be shared with every caller joined on
/// the same in-flight operation.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The session id is unknown - never created, or already destroyed.
    #[error("Sandbox session not found: {0}")]
    NotFound(Uuid),

    /// The requested lifecycle transition is illegal.
    #[error("Invalid session state transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Execution exceeded a configured ceiling and was forcibly terminated.
    #[error("Execution timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The task's language has no registered launcher.
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The backend failed to run the task. Messages are sanitized; they
    /// carry no host paths or stack traces.
    #[error("Execution backend failure: {0}")]
    Backend(String),
}

impl SandboxError {
    /// Build a sanitized backend error from an I/O failure.
    pub fn from_io(err: &std::io::Error) -> Self {
        SandboxError::Backend(format!("sandboxed process failed: {}", err.kind()))
    }
}
