pub mod local;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Identifies the shared sandbox a run executes in. The session is expected
/// to tolerate concurrent commands; nothing here serializes access to it.
#[derive(Debug, Clone)]
pub struct SandboxSession {
    pub id: String,
    pub workdir: PathBuf,
}

impl SandboxSession {
    pub fn new(id: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            workdir: workdir.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    /// Overrides the session workdir when set.
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            workdir: None,
            env: Vec::new(),
            timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub output: String,
    pub exit_code: i32,
}

impl ExecOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Sandboxed command executor collaborator. Timeouts and environment are
/// enforced per invocation; a failed or timed-out command is reported to
/// the caller, never to its sibling invocations.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecRequest, session: &SandboxSession) -> Result<ExecOutcome>;
}
