use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::sandbox::{ExecOutcome, ExecRequest, Executor, SandboxSession};

/// Runs commands as local subprocesses under the session working directory.
/// Stands in for a remote sandbox service in local mode.
pub struct LocalExecutor;

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, request: ExecRequest, session: &SandboxSession) -> Result<ExecOutcome> {
        let workdir = request
            .workdir
            .clone()
            .unwrap_or_else(|| session.workdir.clone());

        tracing::debug!(
            session = %session.id,
            command = %request.command,
            workdir = %workdir.display(),
            "Executing sandbox command"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&workdir)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        let output = tokio::time::timeout(request.timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Sandbox(format!(
                    "Command timed out after {}s: {}",
                    request.timeout.as_secs(),
                    request.command
                ))
            })??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        Ok(ExecOutcome {
            output: combined,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(dir: &std::path::Path) -> SandboxSession {
        SandboxSession::new("test-session", dir)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = LocalExecutor
            .execute(
                ExecRequest::new("echo hello", Duration::from_secs(5)),
                &session(tmp.path()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.output.trim(), "hello");
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = LocalExecutor
            .execute(
                ExecRequest::new("exit 3", Duration::from_secs(5)),
                &session(tmp.path()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_sandbox_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = LocalExecutor
            .execute(
                ExecRequest::new("sleep 5", Duration::from_millis(100)),
                &session(tmp.path()),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Sandbox(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_runs_in_session_workdir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "here").unwrap();
        let outcome = LocalExecutor
            .execute(
                ExecRequest::new("cat marker.txt", Duration::from_secs(5)),
                &session(tmp.path()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.output.trim(), "here");
    }
}
