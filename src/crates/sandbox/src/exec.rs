//! Execution backends and transcripts.
//!
//! The [`ExecutionBackend`] trait is the seam between the session manager
//! and whatever actually runs code. The default [`ProcessBackend`] launches
//! a throwaway process through `sh` with:
//! - a cleared environment and a scratch working directory
//! - memory/cpu ceilings applied via `ulimit` in the launch shell
//! - the wall-clock ceiling enforced by dropping the child future
//!   (`kill_on_drop`), so a timed-out process is killed, never leaked
//!
//! Every execution produces an ordered transcript of [`TranscriptEvent`]s,
//! captured on all exit paths.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::policy::Violation;
use crate::session::ResourceLimits;

/// Output capture ceiling; anything beyond it is truncated with a marker.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Languages the process backend knows how to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Shell,
    Python,
    JavaScript,
}

impl std::fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CodeLanguage::Shell => "shell",
            CodeLanguage::Python => "python",
            CodeLanguage::JavaScript => "javascript",
        };
        write!(f, "{}", s)
    }
}

/// A unit of code to run in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub code: String,
    pub language: CodeLanguage,
}

impl ExecutionTask {
    pub fn new(code: impl Into<String>, language: CodeLanguage) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }

    pub fn shell(code: impl Into<String>) -> Self {
        Self::new(code, CodeLanguage::Shell)
    }
}

/// Raw result of a backend run.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
}

/// One entry in an execution transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TranscriptKind,
}

impl TranscriptEvent {
    pub fn now(kind: TranscriptKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

/// What happened at a transcript point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptKind {
    Started { language: CodeLanguage },
    Rejected { rule: String, reason: String },
    Stdout { chunk: String },
    Stderr { chunk: String },
    Finished { exit_status: Option<i32> },
    TimedOut { duration_ms: u64 },
}

/// Final result of `execute`: outcome data, never a thrown violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
    pub security_violations: Vec<Violation>,
    pub duration_ms: u64,
    pub transcript: Vec<TranscriptEvent>,
}

/// Seam between the session manager and a concrete execution strategy.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run an already-screened task under the given ceilings.
    ///
    /// Exceeding the wall-clock ceiling must terminate the process and
    /// return [`SandboxError::Timeout`].
    async fn run(
        &self,
        task: &ExecutionTask,
        limits: &ResourceLimits,
        workdir: &Path,
    ) -> Result<RawOutput>;
}

/// Default backend: a throwaway OS process per execution.
#[derive(Debug, Default)]
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }

    /// Build the `sh -c` script: ulimit ceilings first, then the language
    /// launcher.
    fn launch_script(task: &ExecutionTask, limits: &ResourceLimits) -> String {
        let mut script = String::new();
        if limits.memory_bytes > 0 {
            script.push_str(&format!(
                "ulimit -v {} 2>/dev/null; ",
                limits.memory_bytes / 1024
            ));
        }
        if limits.cpu_seconds > 0 {
            script.push_str(&format!("ulimit -t {} 2>/dev/null; ", limits.cpu_seconds));
        }
        match task.language {
            CodeLanguage::Shell => script.push_str(&task.code),
            CodeLanguage::Python => {
                script.push_str("python3 -c ");
                script.push_str(&shell_quote(&task.code));
            }
            CodeLanguage::JavaScript => {
                script.push_str("node -e ");
                script.push_str(&shell_quote(&task.code));
            }
        }
        script
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn run(
        &self,
        task: &ExecutionTask,
        limits: &ResourceLimits,
        workdir: &Path,
    ) -> Result<RawOutput> {
        let script = Self::launch_script(task, limits);
        debug!(language = %task.language, "launching sandboxed process");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .current_dir(workdir)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| SandboxError::from_io(&e))?;

        // Dropping the wait future on timeout kills the child via
        // kill_on_drop: the process is never left running.
        let waited = tokio::time::timeout(limits.timeout, child.wait_with_output()).await;
        match waited {
            Ok(Ok(output)) => Ok(RawOutput {
                stdout: capture(&output.stdout),
                stderr: capture(&output.stderr),
                exit_status: output.status.code(),
            }),
            Ok(Err(e)) => Err(SandboxError::from_io(&e)),
            Err(_elapsed) => Err(SandboxError::Timeout {
                duration_ms: limits.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Scratch working directory with guaranteed removal.
///
/// Dropping the guard deletes the directory on every exit path - success,
/// fault, or timeout - which is the scoped-acquisition half of the sandbox
/// cleanup contract.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub(crate) fn create(session_id: uuid::Uuid) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("flowforge-sbx-{}", session_id));
        std::fs::create_dir_all(&path).map_err(|e| SandboxError::from_io(&e))?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut truncated: String = text.chars().take(MAX_CAPTURE_BYTES).collect();
    truncated.push_str("\n[output truncated]");
    truncated
}

/// Single-quote a string for `sh -c`.
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Wall-clock helper for the manager's duration accounting.
pub(crate) fn millis_since(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
