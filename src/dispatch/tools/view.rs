use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::tools::{require_str, shell_quote, Capability, CapabilityOutcome};
use crate::error::Result;
use crate::model::ToolDefinition;
use crate::sandbox::{ExecRequest, Executor, SandboxSession};

pub struct ViewCapability {
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl ViewCapability {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl Capability for ViewCapability {
    fn name(&self) -> &'static str {
        "view"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "view".to_string(),
            description: "View the contents of a file, optionally restricted to a line range.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the sandbox root"
                    },
                    "start_line": {
                        "type": "integer",
                        "description": "First line to show (1-based)"
                    },
                    "end_line": {
                        "type": "integer",
                        "description": "Last line to show (inclusive)"
                    }
                },
                "required": ["path"]
            }),
            cache_control: None,
        }
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        session: &SandboxSession,
    ) -> Result<CapabilityOutcome> {
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(outcome) => return Ok(outcome),
        };
        let start = args.get("start_line").and_then(|v| v.as_u64());
        let end = args.get("end_line").and_then(|v| v.as_u64());

        let command = match (start, end) {
            (Some(s), Some(e)) => format!("sed -n '{s},{e}p' {}", shell_quote(&path)),
            (Some(s), None) => format!("sed -n '{s},$p' {}", shell_quote(&path)),
            _ => format!("cat {}", shell_quote(&path)),
        };

        let outcome = self
            .executor
            .execute(ExecRequest::new(command, self.timeout), session)
            .await?;

        if outcome.succeeded() {
            Ok(CapabilityOutcome::success(outcome.output).with_exit_code(0))
        } else {
            Ok(CapabilityOutcome::error(format!(
                "Could not view {path}:\n{}",
                outcome.output
            ))
            .with_exit_code(outcome.exit_code))
        }
    }
}
