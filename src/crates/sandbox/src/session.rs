//! Session lifecycle and resource ceilings.
//!
//! A session moves through `Created → Ready → Executing ⇄ Idle → Destroyed`.
//! Destroy is terminal. Transitions are validated; anything else is an
//! [`crate::SandboxError::InvalidTransition`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SandboxError};

/// How strictly a session is locked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

/// Filesystem exposure granted to sandboxed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsAccess {
    /// Scratch directory only.
    None,
    ReadOnly,
    ReadWrite,
}

/// Hard ceilings applied to every execution in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock ceiling; exceeding it kills the process.
    pub timeout: Duration,
    /// Virtual memory ceiling in bytes (0 disables the limit).
    pub memory_bytes: u64,
    /// CPU-time ceiling in seconds (0 disables the limit).
    pub cpu_seconds: u64,
    /// Whether sandboxed code may open network connections.
    pub network_access: bool,
    /// Filesystem exposure mode.
    pub fs_access: FsAccess,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_bytes: 256 * 1024 * 1024,
            cpu_seconds: 5,
            network_access: false,
            fs_access: FsAccess::None,
        }
    }
}

/// Session configuration: a security level plus its resource ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub security_level: SecurityLevel,
    pub limits: ResourceLimits,
}

impl SandboxConfig {
    /// Preset ceilings for a security level.
    pub fn for_level(level: SecurityLevel) -> Self {
        let limits = match level {
            SecurityLevel::High => ResourceLimits::default(),
            SecurityLevel::Medium => ResourceLimits {
                timeout: Duration::from_secs(30),
                memory_bytes: 512 * 1024 * 1024,
                cpu_seconds: 15,
                network_access: false,
                fs_access: FsAccess::ReadOnly,
            },
            SecurityLevel::Low => ResourceLimits {
                timeout: Duration::from_secs(60),
                memory_bytes: 1024 * 1024 * 1024,
                cpu_seconds: 30,
                network_access: true,
                fs_access: FsAccess::ReadWrite,
            },
        };
        Self {
            security_level: level,
            limits,
        }
    }

    /// Override the wall-clock ceiling.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    /// Override the memory ceiling.
    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.limits.memory_bytes = bytes;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::for_level(SecurityLevel::High)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Ready,
    Executing,
    Idle,
    Destroyed,
}

impl SessionState {
    /// Whether moving to `to` is a legal lifecycle step.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Created, Ready)
                | (Ready, Executing)
                | (Executing, Idle)
                | (Idle, Executing)
                | (Created, Destroyed)
                | (Ready, Destroyed)
                | (Executing, Destroyed)
                | (Idle, Destroyed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Idle => "idle",
            SessionState::Destroyed => "destroyed",
        };
        write!(f, "{}", s)
    }
}

/// A live sandbox session.
#[derive(Debug, Clone)]
pub struct SandboxSession {
    pub id: Uuid,
    pub config: SandboxConfig,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_transition: DateTime<Utc>,
}

impl SandboxSession {
    pub fn new(config: SandboxConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            config,
            state: SessionState::Created,
            created_at: now,
            last_transition: now,
        }
    }

    /// Apply a lifecycle transition.
    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(SandboxError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.last_transition = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut session = SandboxSession::new(SandboxConfig::default());
        assert_eq!(session.state, SessionState::Created);
        session.transition(SessionState::Ready).unwrap();
        session.transition(SessionState::Executing).unwrap();
        session.transition(SessionState::Idle).unwrap();
        session.transition(SessionState::Executing).unwrap();
        session.transition(SessionState::Idle).unwrap();
        session.transition(SessionState::Destroyed).unwrap();
    }

    #[test]
    fn test_destroy_is_terminal() {
        let mut session = SandboxSession::new(SandboxConfig::default());
        session.transition(SessionState::Ready).unwrap();
        session.transition(SessionState::Destroyed).unwrap();
        let err = session.transition(SessionState::Executing).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidTransition { .. }));
    }

    #[test]
    fn test_cannot_execute_before_ready() {
        let mut session = SandboxSession::new(SandboxConfig::default());
        assert!(session.transition(SessionState::Executing).is_err());
    }

    #[test]
    fn test_level_presets_tighten_with_level() {
        let high = SandboxConfig::for_level(SecurityLevel::High);
        let low = SandboxConfig::for_level(SecurityLevel::Low);
        assert!(!high.limits.network_access);
        assert_eq!(high.limits.fs_access, FsAccess::None);
        assert!(low.limits.network_access);
        assert!(high.limits.timeout < low.limits.timeout);
    }
}
