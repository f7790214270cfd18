pub mod browser;
pub mod edit;
pub mod search;
pub mod shell;
pub mod view;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::graph::state::ActionStatus;
use crate::model::ToolDefinition;
use crate::sandbox::{Executor, SandboxSession};

/// Outcome of one capability invocation. An error outcome is recoverable:
/// it becomes an error `ActionResult`, never a failed batch.
#[derive(Debug, Clone)]
pub struct CapabilityOutcome {
    pub content: String,
    pub status: ActionStatus,
    pub exit_code: Option<i32>,
}

impl CapabilityOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: ActionStatus::Success,
            exit_code: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: ActionStatus::Error,
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// One entry in the closed capability set the dispatcher can execute.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;
    fn definition(&self) -> ToolDefinition;
    async fn invoke(
        &self,
        args: serde_json::Value,
        session: &SandboxSession,
    ) -> Result<CapabilityOutcome>;
}

pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new(executor: Arc<dyn Executor>, config: &SandboxConfig) -> Self {
        let timeout = Duration::from_secs(config.command_timeout_secs);
        let capabilities: Vec<Arc<dyn Capability>> = vec![
            Arc::new(shell::ShellCapability::new(Arc::clone(&executor), timeout)),
            Arc::new(search::SearchCapability::new(Arc::clone(&executor), timeout)),
            Arc::new(view::ViewCapability::new(Arc::clone(&executor), timeout)),
            Arc::new(edit::EditCapability),
            Arc::new(browser::BrowserCapability::new(executor, timeout)),
        ];
        Self { capabilities }
    }

    /// A registry with an explicit capability set, for tests and embedding.
    pub fn with_capabilities(capabilities: Vec<Arc<dyn Capability>>) -> Self {
        Self { capabilities }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.capabilities.iter().map(|c| c.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.name() == name)
            .map(Arc::clone)
    }
}

/// Pull a required string argument, or produce the recoverable error
/// outcome the model can react to.
pub(crate) fn require_str(
    args: &serde_json::Value,
    key: &str,
) -> std::result::Result<String, CapabilityOutcome> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(CapabilityOutcome::error(format!(
            "Missing required parameter: {key}"
        ))),
    }
}

/// Resolve a relative path inside the session workdir, rejecting absolute
/// paths and traversal outside the sandbox.
pub(crate) fn verified_path(
    session: &SandboxSession,
    path: &str,
) -> std::result::Result<PathBuf, CapabilityOutcome> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(CapabilityOutcome::error(format!(
            "Absolute paths are not allowed: {path}"
        )));
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(CapabilityOutcome::error(format!(
                "Path escapes the sandbox: {path}"
            )));
        }
    }
    Ok(session.workdir.join(candidate))
}

/// Single-quote a value for embedding in a `sh -c` command line.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SandboxSession {
        SandboxSession::new("s1", "/tmp/trellis-test")
    }

    #[test]
    fn test_verified_path_rejects_escape() {
        assert!(verified_path(&session(), "../etc/passwd").is_err());
        assert!(verified_path(&session(), "/etc/passwd").is_err());
        assert!(verified_path(&session(), "src/lib.rs").is_ok());
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("plain"), "'plain'");
    }

    #[test]
    fn test_require_str_rejects_missing_and_empty() {
        let args = serde_json::json!({"present": "x", "empty": ""});
        assert!(require_str(&args, "present").is_ok());
        assert!(require_str(&args, "empty").is_err());
        assert!(require_str(&args, "absent").is_err());
    }
}
