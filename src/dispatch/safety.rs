use crate::graph::state::ActionRequest;

/// Command fragments that are never allowed to reach the executor in
/// local mode. Matching is case-insensitive and substring-based.
const DENY_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "sudo ",
    "shutdown",
    "reboot",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){",
    "git push --force",
    "chmod -r 777 /",
];

#[derive(Debug)]
pub struct RemovedRequest {
    pub request: ActionRequest,
    pub reason: String,
}

#[derive(Debug)]
pub struct FilterResult {
    pub allowed: Vec<ActionRequest>,
    pub removed: Vec<RemovedRequest>,
}

impl FilterResult {
    pub fn was_filtered(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Pre-pass over an action batch that drops requests carrying disallowed
/// shell commands. Engaged only in local mode, where commands run on the
/// host rather than in a disposable sandbox.
#[derive(Debug, Default)]
pub struct SafetyFilter;

impl SafetyFilter {
    pub fn filter(&self, batch: &[ActionRequest]) -> FilterResult {
        let mut allowed = Vec::new();
        let mut removed = Vec::new();

        for request in batch {
            match disallowed_pattern(request) {
                Some(pattern) => {
                    tracing::warn!(
                        tool = %request.name,
                        pattern = pattern,
                        "Removing unsafe action request"
                    );
                    removed.push(RemovedRequest {
                        request: request.clone(),
                        reason: format!("command matches disallowed pattern: {pattern}"),
                    });
                }
                None => allowed.push(request.clone()),
            }
        }

        FilterResult { allowed, removed }
    }
}

fn disallowed_pattern(request: &ActionRequest) -> Option<&'static str> {
    let command = request.arguments.get("command").and_then(|v| v.as_str())?;
    let lowered = command.to_lowercase();
    DENY_PATTERNS
        .iter()
        .find(|pattern| lowered.contains(&pattern.to_lowercase()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_request(id: &str, command: &str) -> ActionRequest {
        ActionRequest {
            id: id.to_string(),
            name: "shell".to_string(),
            arguments: json!({"command": command}),
        }
    }

    #[test]
    fn test_removes_destructive_commands() {
        let batch = vec![
            shell_request("r1", "cargo test"),
            shell_request("r2", "sudo rm -rf /var"),
            shell_request("r3", "ls -la"),
        ];
        let result = SafetyFilter.filter(&batch);
        assert!(result.was_filtered());
        assert_eq!(result.allowed.len(), 2);
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].request.id, "r2");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let batch = vec![shell_request("r1", "SUDO reboot")];
        let result = SafetyFilter.filter(&batch);
        assert_eq!(result.allowed.len(), 0);
    }

    #[test]
    fn test_requests_without_commands_pass_through() {
        let batch = vec![ActionRequest {
            id: "r1".to_string(),
            name: "view".to_string(),
            arguments: json!({"path": "README.md"}),
        }];
        let result = SafetyFilter.filter(&batch);
        assert!(!result.was_filtered());
        assert_eq!(result.allowed.len(), 1);
    }
}
