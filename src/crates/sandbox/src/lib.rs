//! Security sandbox for flowforge.
//!
//! Generated workflows sometimes carry code that has to be tried out before
//! anyone trusts it. This crate provides that isolation boundary:
//!
//! - a static deny-list screen that rejects destructive code before any
//!   execution ([`policy`])
//! - resource-ceilinged sessions with an enforced lifecycle state machine
//!   ([`session`])
//! - a process-based execution backend with wall-clock, memory, and cpu
//!   ceilings ([`exec`])
//! - a [`SandboxManager`] owning every session; there is no module-level
//!   mutable state
//!
//! Violations and timeouts are data or typed errors - host stack traces
//! never cross this boundary.

pub mod error;
pub mod exec;
pub mod manager;
pub mod policy;
pub mod session;

pub use error::{Result, SandboxError};
pub use exec::{
    CodeLanguage, ExecutionBackend, ExecutionOutcome, ExecutionTask, ProcessBackend,
    TranscriptEvent, TranscriptKind,
};
pub use manager::SandboxManager;
pub use policy::{CodeScreen, Violation};
pub use session::{FsAccess, ResourceLimits, SandboxConfig, SecurityLevel, SessionState};
