use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::tools::{require_str, verified_path, Capability, CapabilityOutcome};
use crate::error::Result;
use crate::model::ToolDefinition;
use crate::sandbox::SandboxSession;

/// Text editing inside the sandbox working tree: create files, replace an
/// exact string, or insert after a line.
pub struct EditCapability;

#[async_trait]
impl Capability for EditCapability {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit".to_string(),
            description: "Edit files in the sandbox. Commands: create (write file_text to path), str_replace (replace old_str with new_str, old_str must occur exactly once), insert (insert new_str after insert_line).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "enum": ["create", "str_replace", "insert"],
                        "description": "The edit operation to perform"
                    },
                    "path": {
                        "type": "string",
                        "description": "File path relative to the sandbox root"
                    },
                    "file_text": {
                        "type": "string",
                        "description": "Full file contents (create)"
                    },
                    "old_str": {
                        "type": "string",
                        "description": "Exact text to replace (str_replace)"
                    },
                    "new_str": {
                        "type": "string",
                        "description": "Replacement or inserted text"
                    },
                    "insert_line": {
                        "type": "integer",
                        "description": "Line to insert after, 0 for start of file (insert)"
                    }
                },
                "required": ["command", "path"]
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
        let path = match require_str(&args, "path") {
            Ok(p) => p,
            Err(outcome) => return Ok(outcome),
        };
        let full_path = match verified_path(session, &path) {
            Ok(p) => p,
            Err(outcome) => return Ok(outcome),
        };

        match command.as_str() {
            "create" => {
                let text = args
                    .get("file_text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if let Some(parent) = full_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full_path, text).await?;
                Ok(CapabilityOutcome::success(format!("Created {path}")))
            }
            "str_replace" => {
                let old_str = match require_str(&args, "old_str") {
                    Ok(s) => s,
                    Err(outcome) => return Ok(outcome),
                };
                let new_str = args
                    .get("new_str")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();

                let content = match tokio::fs::read_to_string(&full_path).await {
                    Ok(c) => c,
                    Err(e) => {
                        return Ok(CapabilityOutcome::error(format!(
                            "Could not read {path}: {e}"
                        )))
                    }
                };

                let occurrences = content.matches(&old_str).count();
                if occurrences == 0 {
                    return Ok(CapabilityOutcome::error(format!(
                        "old_str not found in {path}"
                    )));
                }
                if occurrences > 1 {
                    return Ok(CapabilityOutcome::error(format!(
                        "old_str occurs {occurrences} times in {path}; it must be unique"
                    )));
                }

                let updated = content.replacen(&old_str, new_str, 1);
                tokio::fs::write(&full_path, updated).await?;
                Ok(CapabilityOutcome::success(format!("Edited {path}")))
            }
            "insert" => {
                let new_str = match require_str(&args, "new_str") {
                    Ok(s) => s,
                    Err(outcome) => return Ok(outcome),
                };
                let line = args
                    .get("insert_line")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;

                let content = match tokio::fs::read_to_string(&full_path).await {
                    Ok(c) => c,
                    Err(e) => {
                        return Ok(CapabilityOutcome::error(format!(
                            "Could not read {path}: {e}"
                        )))
                    }
                };

                let mut lines: Vec<&str> = content.lines().collect();
                if line > lines.len() {
                    return Ok(CapabilityOutcome::error(format!(
                        "insert_line {line} is past the end of {path} ({} lines)",
                        lines.len()
                    )));
                }
                lines.insert(line, &new_str);
                let mut updated = lines.join("\n");
                if content.ends_with('\n') {
                    updated.push('\n');
                }
                tokio::fs::write(&full_path, updated).await?;
                Ok(CapabilityOutcome::success(format!(
                    "Inserted into {path} after line {line}"
                )))
            }
            other => Ok(CapabilityOutcome::error(format!(
                "Unknown edit command: {other}"
            ))),
        }
    }
}
