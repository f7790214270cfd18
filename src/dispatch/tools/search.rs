use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::tools::{require_str, shell_quote, Capability, CapabilityOutcome};
use crate::error::Result;
use crate::model::ToolDefinition;
use crate::sandbox::{ExecRequest, Executor, SandboxSession};

pub struct SearchCapability {
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl SearchCapability {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl Capability for SearchCapability {
    fn name(&self) -> &'static str {
        "search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search".to_string(),
            description: "Search file contents with a regular expression. Returns matching lines with file and line number.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regular expression to search for"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory or file to search, relative to the sandbox root"
                    },
                    "case_insensitive": {
                        "type": "boolean",
                        "description": "Match case-insensitively"
                    }
                },
                "required": ["pattern"]
            }),
            cache_control: None,
        }
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        session: &SandboxSession,
    ) -> Result<CapabilityOutcome> {
        let pattern = match require_str(&args, "pattern") {
            Ok(p) => p,
            Err(outcome) => return Ok(outcome),
        };
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let case_flag = if args
            .get("case_insensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            "-i "
        } else {
            ""
        };

        let command = format!(
            "grep -rn {case_flag}-e {} {}",
            shell_quote(&pattern),
            shell_quote(&path)
        );

        let outcome = self
            .executor
            .execute(ExecRequest::new(command, self.timeout), session)
            .await?;

        // grep exits 1 on no matches; that is a valid empty result.
        match outcome.exit_code {
            0 => Ok(CapabilityOutcome::success(outcome.output).with_exit_code(0)),
            1 => Ok(CapabilityOutcome::success("No matches found").with_exit_code(1)),
            code => Ok(CapabilityOutcome::error(format!(
                "Search failed with exit code {code}:\n{}",
                outcome.output
            ))
            .with_exit_code(code)),
        }
    }
}
