use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::tools::{require_str, Capability, CapabilityOutcome};
use crate::error::Result;
use crate::model::ToolDefinition;
use crate::sandbox::{ExecRequest, Executor, SandboxSession};

/// Browser automation via the Playwright CLI. Test-run commands report
/// failures through their output rather than as invocation errors, so the
/// model can read the failing output and react.
pub struct BrowserCapability {
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl BrowserCapability {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        // Browser test runs routinely outlast plain shell commands.
        Self {
            executor,
            timeout: timeout * 3,
        }
    }

    fn compose(args: &serde_json::Value, command: &str) -> std::result::Result<String, String> {
        let browser = args.get("browser").and_then(|v| v.as_str());
        let headless = args
            .get("headless")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let debug = args.get("debug").and_then(|v| v.as_bool()).unwrap_or(false);
        let options = args.get("options").and_then(|v| v.as_str());

        let mut line = match command {
            "run_tests" => "npx playwright test".to_string(),
            "run_test_file" => {
                let file = args
                    .get("test_file")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "test_file is required for run_test_file".to_string())?;
                format!("npx playwright test {file}")
            }
            "install" => "npx playwright install".to_string(),
            "show_report" => "npx playwright show-report".to_string(),
            "check_config" => {
                "npx playwright --version && ls -la playwright.config.*".to_string()
            }
            other => return Err(format!("Unknown browser command: {other}")),
        };

        if matches!(command, "run_tests" | "run_test_file") {
            if let Some(b) = browser {
                if b != "all" {
                    line.push_str(&format!(" --project={b}"));
                }
            }
            if !headless {
                line.push_str(" --headed");
            }
            if debug {
                line.push_str(" --debug");
            }
        }
        if let Some(opts) = options {
            line.push(' ');
            line.push_str(opts);
        }
        Ok(line)
    }
}

#[async_trait]
impl Capability for BrowserCapability {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser".to_string(),
            description: "Run browser automation through Playwright. Commands: run_tests, run_test_file, install, show_report, check_config.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "enum": ["run_tests", "run_test_file", "install", "show_report", "check_config"],
                        "description": "The Playwright command to execute"
                    },
                    "test_file": {
                        "type": "string",
                        "description": "Specific test file to run (run_test_file)"
                    },
                    "browser": {
                        "type": "string",
                        "enum": ["chromium", "firefox", "webkit", "all"],
                        "description": "Browser project to use"
                    },
                    "headless": {
                        "type": "boolean",
                        "description": "Run in headless mode (default true)"
                    },
                    "debug": {
                        "type": "boolean",
                        "description": "Run in debug mode"
                    },
                    "options": {
                        "type": "string",
                        "description": "Additional command line options"
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

        let line = match Self::compose(&args, &command) {
            Ok(l) => l,
            Err(message) => return Ok(CapabilityOutcome::error(message)),
        };

        tracing::info!(command = %line, session = %session.id, "Executing browser command");

        let mut request = ExecRequest::new(line, self.timeout);
        request.env.push(("CI".to_string(), "true".to_string()));
        request.env.push(("FORCE_COLOR".to_string(), "0".to_string()));

        let outcome = self.executor.execute(request, session).await?;

        let is_test_run = matches!(command.as_str(), "run_tests" | "run_test_file");
        if outcome.exit_code != 0 && is_test_run {
            // Test failures still carry useful output; surface them as a
            // successful invocation whose content reports the failure.
            return Ok(CapabilityOutcome::success(format!(
                "Tests completed with exit code {}:\n{}",
                outcome.exit_code, outcome.output
            ))
            .with_exit_code(outcome.exit_code));
        }
        if outcome.exit_code != 0 {
            return Ok(CapabilityOutcome::error(format!(
                "Browser command failed with exit code {}:\n{}",
                outcome.exit_code, outcome.output
            ))
            .with_exit_code(outcome.exit_code));
        }
        Ok(CapabilityOutcome::success(outcome.output).with_exit_code(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compose_run_tests_with_project_and_headed() {
        let args = json!({"browser": "firefox", "headless": false});
        let line = BrowserCapability::compose(&args, "run_tests").unwrap();
        assert_eq!(line, "npx playwright test --project=firefox --headed");
    }

    #[test]
    fn test_compose_run_test_file_requires_file() {
        let err = BrowserCapability::compose(&json!({}), "run_test_file").unwrap_err();
        assert!(err.contains("test_file is required"));
    }

    #[test]
    fn test_compose_rejects_unknown_command() {
        assert!(BrowserCapability::compose(&json!({}), "frobnicate").is_err());
    }
}
