use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::tools::{require_str, Capability, CapabilityOutcome};
use crate::error::Result;
use crate::model::ToolDefinition;
use crate::sandbox::{ExecRequest, Executor, SandboxSession};

pub struct ShellCapability {
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl ShellCapability {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl Capability for ShellCapability {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".to_string(),
            description: "Run a shell command in the sandbox working directory. Returns combined stdout and stderr.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command to run"
                    },
                    "workdir": {
                        "type": "string",
                        "description": "Working directory relative to the sandbox root"
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout in seconds (defaults to the sandbox timeout)"
                    }
                },
                "required": ["command"]
            }),
            cache_control: None,
        }
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        session: &SandboxSession,
    ) -> Result<CapabilityOutcome> {
        let command = match require_str(&args, "command") {
            Ok(c) => c,
            Err(outcome) => return Ok(outcome),
        };

        let mut request = ExecRequest::new(command.clone(), self.timeout);
        if let Some(secs) = args.get("timeout").and_then(|v| v.as_u64()) {
            request.timeout = Duration::from_secs(secs);
        }
        if let Some(workdir) = args.get("workdir").and_then(|v| v.as_str()) {
            request.workdir = Some(session.workdir.join(PathBuf::from(workdir)));
        }

        let outcome = self.executor.execute(request, session).await?;

        if outcome.succeeded() {
            Ok(CapabilityOutcome::success(outcome.output).with_exit_code(outcome.exit_code))
        } else {
            Ok(CapabilityOutcome::error(format!(
                "Command failed with exit code {}:\n{}",
                outcome.exit_code, outcome.output
            ))
            .with_exit_code(outcome.exit_code))
        }
    }
}
