//! Session manager: the single owner of every sandbox session.
//!
//! All lifecycle operations go through [`SandboxManager`]; there is no
//! ambient global state. Sessions live in a concurrent map keyed by id and
//! are removed - permanently - on destroy, violation, or timeout.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::exec::{
    millis_since, ExecutionBackend, ExecutionOutcome, ExecutionTask, ProcessBackend, ScratchDir,
    TranscriptEvent, TranscriptKind,
};
use crate::policy::CodeScreen;
use crate::session::{ResourceLimits, SandboxConfig, SandboxSession, SecurityLevel, SessionState};

/// Owns sandbox sessions and mediates every execution.
pub struct SandboxManager {
    sessions: DashMap<Uuid, Arc<Mutex<SandboxSession>>>,
    backend: Arc<dyn ExecutionBackend>,
}

impl SandboxManager {
    /// Manager with the default process backend.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(ProcessBackend::new()))
    }

    /// Manager with a custom execution backend (tests, alternate isolation).
    pub fn with_backend(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            sessions: DashMap::new(),
            backend,
        }
    }

    /// Allocate a session honoring the given configuration. The session is
    /// immediately ready for execution.
    pub fn create(&self, config: SandboxConfig) -> Result<Uuid> {
        let mut session = SandboxSession::new(config);
        session.transition(SessionState::Ready)?;
        let id = session.id;
        info!(session = %id, level = ?session.config.security_level, "sandbox session created");
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Current lifecycle state of a session.
    pub fn session_state(&self, id: Uuid) -> Result<SessionState> {
        let session = self.sessions.get(&id).ok_or(SandboxError::NotFound(id))?;
        let state = session.lock().state;
        Ok(state)
    }

    /// Number of live sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Screen and execute a task in a session.
    ///
    /// Security violations are reported in the outcome (`success = false`)
    /// and destroy the session; they are never raised as errors. Timeouts
    /// destroy the session and surface as [`SandboxError::Timeout`].
    pub async fn execute(&self, id: Uuid, task: ExecutionTask) -> Result<ExecutionOutcome> {
        let started = std::time::Instant::now();
        let (level, limits) = self.begin_execution(id)?;

        let mut transcript = vec![TranscriptEvent::now(TranscriptKind::Started {
            language: task.language,
        })];

        // Static screen first: a match means zero side effects.
        let violations = CodeScreen::for_level(level).screen(&task.code);
        if !violations.is_empty() {
            for v in &violations {
                transcript.push(TranscriptEvent::now(TranscriptKind::Rejected {
                    rule: v.rule.clone(),
                    reason: v.reason.clone(),
                }));
            }
            warn!(session = %id, rules = violations.len(), "execution rejected by code screen");
            self.destroy(id)?;
            return Ok(ExecutionOutcome {
                success: false,
                stdout: String::new(),
                stderr: violations
                    .iter()
                    .map(|v| format!("security violation [{}]: {}", v.rule, v.reason))
                    .collect::<Vec<_>>()
                    .join("\n"),
                exit_status: None,
                security_violations: violations,
                duration_ms: millis_since(started),
                transcript,
            });
        }

        // Scratch dir drops (and is removed) on every path below.
        let scratch = ScratchDir::create(id)?;
        let run = self.backend.run(&task, &limits, scratch.path()).await;

        match run {
            Ok(raw) => {
                if !raw.stdout.is_empty() {
                    transcript.push(TranscriptEvent::now(TranscriptKind::Stdout {
                        chunk: raw.stdout.clone(),
                    }));
                }
                if !raw.stderr.is_empty() {
                    transcript.push(TranscriptEvent::now(TranscriptKind::Stderr {
                        chunk: raw.stderr.clone(),
                    }));
                }
                transcript.push(TranscriptEvent::now(TranscriptKind::Finished {
                    exit_status: raw.exit_status,
                }));
                self.finish_execution(id)?;
                Ok(ExecutionOutcome {
                    success: raw.exit_status == Some(0),
                    stdout: raw.stdout,
                    stderr: raw.stderr,
                    exit_status: raw.exit_status,
                    security_violations: Vec::new(),
                    duration_ms: millis_since(started),
                    transcript,
                })
            }
            Err(SandboxError::Timeout { duration_ms }) => {
                transcript.push(TranscriptEvent::now(TranscriptKind::TimedOut { duration_ms }));
                warn!(session = %id, duration_ms, "execution timed out; destroying session");
                self.destroy(id)?;
                Err(SandboxError::Timeout { duration_ms })
            }
            Err(other) => {
                // Backend fault: the session itself is still sound.
                self.finish_execution(id)?;
                Err(other)
            }
        }
    }

    /// Execute a task, surfacing the transcript as a finite event stream.
    ///
    /// The stream terminates after the final event; dropping the receiver
    /// cancels delivery. The session bookkeeping is identical to
    /// [`execute`](Self::execute).
    pub fn execute_streamed(
        self: Arc<Self>,
        id: Uuid,
        task: ExecutionTask,
    ) -> ReceiverStream<TranscriptEvent> {
        let (tx, rx) = mpsc::channel(32);
        let manager = self;
        tokio::spawn(async move {
            let events = match manager.execute(id, task).await {
                Ok(outcome) => outcome.transcript,
                Err(SandboxError::Timeout { duration_ms }) => {
                    vec![TranscriptEvent::now(TranscriptKind::TimedOut { duration_ms })]
                }
                Err(_) => Vec::new(),
            };
            for event in events {
                // Receiver gone: the consumer cancelled; stop producing.
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Destroy a session: resources released, id permanently invalid.
    pub fn destroy(&self, id: Uuid) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(SandboxError::NotFound(id))?;
        let mut session = session.lock();
        // Any live state may transition to Destroyed.
        if session.state != SessionState::Destroyed {
            session.state = SessionState::Destroyed;
        }
        info!(session = %id, "sandbox session destroyed");
        Ok(())
    }

    /// Move a session into `Executing`, returning its screening level and
    /// ceilings.
    fn begin_execution(&self, id: Uuid) -> Result<(SecurityLevel, ResourceLimits)> {
        let session = self.sessions.get(&id).ok_or(SandboxError::NotFound(id))?;
        let mut session = session.lock();
        session.transition(SessionState::Executing)?;
        Ok((
            session.config.security_level,
            session.config.limits.clone(),
        ))
    }

    /// Return a session to `Idle` after a run.
    fn finish_execution(&self, id: Uuid) -> Result<()> {
        let session = self.sessions.get(&id).ok_or(SandboxError::NotFound(id))?;
        let mut session = session.lock();
        session.transition(SessionState::Idle)
    }
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn high_security() -> SandboxConfig {
        SandboxConfig::for_level(SecurityLevel::High)
    }

    #[tokio::test]
    async fn test_harmless_script_runs_clean() {
        let manager = SandboxManager::new();
        let id = manager.create(high_security()).unwrap();

        let outcome = manager
            .execute(id, ExecutionTask::shell("echo hello"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(outcome.security_violations.is_empty());
        assert_eq!(manager.session_state(id).unwrap(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_session_is_reusable_between_runs() {
        let manager = SandboxManager::new();
        let id = manager.create(high_security()).unwrap();

        for i in 0..3 {
            let outcome = manager
                .execute(id, ExecutionTask::shell(format!("echo run-{}", i)))
                .await
                .unwrap();
            assert!(outcome.success);
        }
    }

    #[tokio::test]
    async fn test_destructive_script_rejected_and_session_destroyed() {
        let manager = SandboxManager::new();
        let id = manager.create(high_security()).unwrap();

        let outcome = manager
            .execute(id, ExecutionTask::shell("rm -rf /"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(!outcome.security_violations.is_empty());
        assert!(outcome.stdout.is_empty());
        assert_eq!(outcome.exit_status, None);

        // Session is gone: further execution fails with NotFound.
        let err = manager
            .execute(id, ExecutionTask::shell("echo again"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout_destroys_session() {
        let manager = SandboxManager::new();
        let config =
            high_security().with_timeout(std::time::Duration::from_millis(100));
        let id = manager.create(config).unwrap();

        let err = manager
            .execute(id, ExecutionTask::shell("sleep 5"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert!(matches!(
            manager.session_state(id),
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_makes_id_permanently_invalid() {
        let manager = SandboxManager::new();
        let id = manager.create(high_security()).unwrap();
        manager.destroy(id).unwrap();

        assert!(matches!(
            manager.destroy(id),
            Err(SandboxError::NotFound(_))
        ));
        let err = manager
            .execute(id, ExecutionTask::shell("echo hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_streamed_transcript_is_finite() {
        let manager = Arc::new(SandboxManager::new());
        let id = manager.create(high_security()).unwrap();

        let events: Vec<TranscriptEvent> = manager
            .execute_streamed(id, ExecutionTask::shell("echo streamed"))
            .collect()
            .await;
        assert!(matches!(
            events.first().map(|e| &e.kind),
            Some(TranscriptKind::Started { .. })
        ));
        assert!(matches!(
            events.last().map(|e| &e.kind),
            Some(TranscriptKind::Finished { .. })
        ));
    }

    #[tokio::test]
    async fn test_transcript_captures_all_paths() {
        let manager = SandboxManager::new();
        let id = manager.create(high_security()).unwrap();

        let outcome = manager
            .execute(id, ExecutionTask::shell("echo out; echo err >&2"))
            .await
            .unwrap();
        let kinds: Vec<&TranscriptKind> = outcome.transcript.iter().map(|e| &e.kind).collect();
        assert!(kinds
            .iter()
            .any(|k| matches!(k, TranscriptKind::Stdout { .. })));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, TranscriptKind::Stderr { .. })));
    }
}
