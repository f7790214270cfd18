pub mod safety;
pub mod tools;

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::graph::state::{ActionRequest, ActionResult, ActionStatus, TranscriptEntry};
use crate::model::ToolDefinition;
use crate::sandbox::SandboxSession;
use safety::SafetyFilter;
use tools::{Capability, CapabilityRegistry};

/// Substrings that mark a result as a failure regardless of its status.
/// A coarse best-effort signal; exit codes are recorded alongside for
/// callers that need something stricter.
const FAIL_TOKENS: &[&str] = &["failed", "error", "failing"];

#[derive(Debug)]
pub struct DispatchOutcome {
    /// Exactly one result per surviving request, in request order.
    pub results: Vec<ActionResult>,
    /// Aggregate success signal over the batch.
    pub success: bool,
    /// When the safety filter removed requests, the agent entry rewritten
    /// to reflect only the survivors. Must be appended to the transcript
    /// before the results.
    pub rewritten_entry: Option<TranscriptEntry>,
}

/// Executes an action batch concurrently against the shared sandbox
/// session, isolating per-call failures into error results.
pub struct ToolDispatcher {
    registry: Arc<CapabilityRegistry>,
    max_output_len: usize,
    safety_filter: Option<SafetyFilter>,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        max_output_len: usize,
        safety_filter: Option<SafetyFilter>,
    ) -> Self {
        Self {
            registry,
            max_output_len,
            safety_filter,
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Dispatch the action batch carried by `entry`. The batch must be
    /// non-empty; an empty batch is a precondition violation that fails the
    /// calling step.
    pub async fn dispatch(
        &self,
        entry: &TranscriptEntry,
        session: &SandboxSession,
    ) -> Result<DispatchOutcome> {
        if entry.action_requests.is_empty() {
            return Err(AppError::Dispatch(
                "Agent entry carries no action requests".to_string(),
            ));
        }

        let (requests, rewritten_entry) = match &self.safety_filter {
            Some(filter) => {
                let filtered = filter.filter(&entry.action_requests);
                if filtered.was_filtered() {
                    // The rewrite supersedes the original entry and keeps
                    // its marker flags, so transcript projections see one
                    // agent turn whose requests match what actually ran.
                    let mut rewritten =
                        TranscriptEntry::agent(entry.content.clone(), filtered.allowed.clone())
                            .with_supersedes(entry.id.clone());
                    rewritten.writing_tests = entry.writing_tests;
                    rewritten.test_execution = entry.test_execution;
                    (filtered.allowed, Some(rewritten))
                } else {
                    (filtered.allowed, None)
                }
            }
            None => (entry.action_requests.clone(), None),
        };

        enum Pending {
            Ready(ActionResult),
            Running(String, tokio::task::JoinHandle<ActionResult>),
        }

        let mut pending = Vec::with_capacity(requests.len());
        for request in &requests {
            match self.registry.get(&request.name) {
                None => {
                    tracing::error!(tool = %request.name, "Unknown tool requested");
                    pending.push(Pending::Ready(ActionResult {
                        request_id: request.id.clone(),
                        status: ActionStatus::Error,
                        content: format!("Unknown tool: {}", request.name),
                        truncated: false,
                    }));
                }
                Some(capability) => {
                    let request = request.clone();
                    let session = session.clone();
                    let max_output_len = self.max_output_len;
                    let id = request.id.clone();
                    pending.push(Pending::Running(
                        id,
                        tokio::spawn(async move {
                            invoke_one(capability, request, session, max_output_len).await
                        }),
                    ));
                }
            }
        }

        // Await in request order so the transcript stays deterministic no
        // matter which invocation finishes first.
        let mut results = Vec::with_capacity(pending.len());
        for item in pending {
            match item {
                Pending::Ready(result) => results.push(result),
                Pending::Running(request_id, handle) => match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        tracing::error!(error = %e, "Tool task panicked");
                        results.push(ActionResult {
                            request_id,
                            status: ActionStatus::Error,
                            content: format!("Internal error: tool task panicked: {e}"),
                            truncated: false,
                        });
                    }
                },
            }
        }

        let success = aggregate_success(&results);

        tracing::info!(
            batch = results.len(),
            success,
            session = %session.id,
            "Completed action batch"
        );

        Ok(DispatchOutcome {
            results,
            success,
            rewritten_entry,
        })
    }
}

async fn invoke_one(
    capability: Arc<dyn Capability>,
    request: ActionRequest,
    session: SandboxSession,
    max_output_len: usize,
) -> ActionResult {
    tracing::info!(tool = %request.name, id = %request.id, "Executing action");

    let (content, status) = match capability.invoke(request.arguments, &session).await {
        Ok(outcome) => (outcome.content, outcome.status),
        Err(e) => {
            tracing::error!(tool = %request.name, error = %e, "Tool invocation failed");
            (
                format!("FAILED TO CALL TOOL: \"{}\"\n\n{e}", request.name),
                ActionStatus::Error,
            )
        }
    };

    // Keep downstream content heuristics well-defined.
    let content = if content.is_empty() {
        match status {
            ActionStatus::Success => "Tool call returned no result".to_string(),
            ActionStatus::Error => "Tool call failed".to_string(),
        }
    } else {
        content
    };

    let (content, truncated) = truncate_output(content, max_output_len);

    ActionResult {
        request_id: request.id,
        status,
        content,
        truncated,
    }
}

/// False iff any result errored or any content carries a fail token
/// (case-insensitive).
pub fn aggregate_success(results: &[ActionResult]) -> bool {
    !results.iter().any(|result| {
        if result.status == ActionStatus::Error {
            return true;
        }
        let lowered = result.content.to_lowercase();
        FAIL_TOKENS.iter().any(|token| lowered.contains(token))
    })
}

fn truncate_output(content: String, max: usize) -> (String, bool) {
    if content.len() <= max {
        return (content, false);
    }
    let mut cut = max;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = content[..cut].to_string();
    truncated.push_str("\n\n[output truncated]");
    (truncated, true)
}

#[cfg(test)]
mod tests {
    use super::tools::CapabilityOutcome;
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Scriptable capability: args drive the reply, delay, and failure mode.
    struct ScriptedCapability;

    #[async_trait]
    impl Capability for ScriptedCapability {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "scripted".to_string(),
                description: String::new(),
                input_schema: json!({}),
                cache_control: None,
            }
        }

        async fn invoke(
            &self,
            args: serde_json::Value,
            _session: &SandboxSession,
        ) -> Result<CapabilityOutcome> {
            if let Some(ms) = args.get("delay_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if args.get("explode").is_some() {
                return Err(AppError::Sandbox("executor exploded".to_string()));
            }
            let reply = args
                .get("reply")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(CapabilityOutcome::success(reply))
        }
    }

    fn dispatcher(filter: Option<SafetyFilter>) -> ToolDispatcher {
        let registry = CapabilityRegistry::with_capabilities(vec![Arc::new(ScriptedCapability)]);
        ToolDispatcher::new(Arc::new(registry), 100, filter)
    }

    fn session() -> SandboxSession {
        SandboxSession::new("s1", "/tmp")
    }

    fn request(id: &str, args: serde_json::Value) -> ActionRequest {
        ActionRequest {
            id: id.to_string(),
            name: "scripted".to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_results_come_back_in_request_order() {
        // First request finishes last; order must still match the batch.
        let entry = TranscriptEntry::agent(
            "",
            vec![
                request("r1", json!({"delay_ms": 60, "reply": "one"})),
                request("r2", json!({"delay_ms": 20, "reply": "two"})),
                request("r3", json!({"reply": "three"})),
            ],
        );

        let outcome = dispatcher(None).dispatch(&entry, &session()).await.unwrap();
        let ids: Vec<&str> = outcome
            .results
            .iter()
            .map(|r| r.request_id.as_str())
            .collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert_eq!(outcome.results[0].content, "one");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_synthesized_and_siblings_complete() {
        let entry = TranscriptEntry::agent(
            "",
            vec![
                ActionRequest {
                    id: "r1".to_string(),
                    name: "frobnicate".to_string(),
                    arguments: json!({}),
                },
                request("r2", json!({"reply": "fine"})),
            ],
        );

        let outcome = dispatcher(None).dispatch(&entry, &session()).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].status, ActionStatus::Error);
        assert_eq!(outcome.results[0].content, "Unknown tool: frobnicate");
        assert_eq!(outcome.results[1].status, ActionStatus::Success);
        assert_eq!(outcome.results[1].content, "fine");
    }

    #[tokio::test]
    async fn test_invocation_failure_is_isolated() {
        let entry = TranscriptEntry::agent(
            "",
            vec![
                request("r1", json!({"explode": true})),
                request("r2", json!({"reply": "ok"})),
            ],
        );

        let outcome = dispatcher(None).dispatch(&entry, &session()).await.unwrap();
        assert_eq!(outcome.results[0].status, ActionStatus::Error);
        assert!(outcome.results[0].content.contains("FAILED TO CALL TOOL"));
        assert_eq!(outcome.results[1].content, "ok");
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_empty_success_content_is_normalized() {
        let entry = TranscriptEntry::agent("", vec![request("r1", json!({}))]);
        let outcome = dispatcher(None).dispatch(&entry, &session()).await.unwrap();
        assert_eq!(outcome.results[0].content, "Tool call returned no result");
    }

    #[tokio::test]
    async fn test_long_output_is_truncated() {
        let long = "x".repeat(500);
        let entry = TranscriptEntry::agent("", vec![request("r1", json!({"reply": long}))]);
        let outcome = dispatcher(None).dispatch(&entry, &session()).await.unwrap();
        assert!(outcome.results[0].truncated);
        assert!(outcome.results[0].content.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_precondition_violation() {
        let entry = TranscriptEntry::agent("no actions", vec![]);
        let err = dispatcher(None)
            .dispatch(&entry, &session())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Dispatch(_)));
    }

    #[tokio::test]
    async fn test_safety_filter_rewrites_agent_entry() {
        let entry = TranscriptEntry::agent(
            "cleaning up",
            vec![
                ActionRequest {
                    id: "r1".to_string(),
                    name: "shell".to_string(),
                    arguments: json!({"command": "sudo rm -rf /"}),
                },
                request("r2", json!({"reply": "survived"})),
            ],
        )
        .with_writing_tests();

        let outcome = dispatcher(Some(SafetyFilter))
            .dispatch(&entry, &session())
            .await
            .unwrap();

        // Only the surviving request was executed.
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].request_id, "r2");

        let rewritten = outcome.rewritten_entry.expect("rewritten entry");
        assert_eq!(rewritten.content, "cleaning up");
        assert_eq!(rewritten.action_requests.len(), 1);
        assert_eq!(rewritten.action_requests[0].id, "r2");
        // The rewrite replaces the original and keeps its marker flags.
        assert_eq!(rewritten.supersedes.as_deref(), Some(entry.id.as_str()));
        assert!(rewritten.writing_tests);
    }

    #[test]
    fn test_aggregate_success_token_matching() {
        let ok = ActionResult {
            request_id: "r1".to_string(),
            status: ActionStatus::Success,
            content: "All 12 tests passed".to_string(),
            truncated: false,
        };
        let token = ActionResult {
            request_id: "r2".to_string(),
            status: ActionStatus::Success,
            content: "1 test FAILED".to_string(),
            truncated: false,
        };
        let errored = ActionResult {
            request_id: "r3".to_string(),
            status: ActionStatus::Error,
            content: "ok".to_string(),
            truncated: false,
        };

        assert!(aggregate_success(&[ok.clone()]));
        assert!(!aggregate_success(&[ok.clone(), token]));
        assert!(!aggregate_success(&[ok, errored]));
    }
}
