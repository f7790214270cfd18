use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Repository a run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for RepoTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Where the verification phase currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotStarted,
    Required,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Produced by the model (may carry action requests).
    Agent,
    /// Result of one dispatched action.
    ToolResult,
    /// Internal bookkeeping (init banners, diagnoses, conclusion report).
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Error,
}

/// One action the model asked for. Ids are unique within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Outcome of one dispatched action, matched to its request by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub request_id: String,
    pub status: ActionStatus,
    pub content: String,
    pub truncated: bool,
}

/// One entry in the run transcript. Entries are append-only: once written
/// they are never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub origin: EntryOrigin,
    pub content: String,
    /// Action requests carried by an agent entry.
    #[serde(default)]
    pub action_requests: Vec<ActionRequest>,
    /// For tool results: the originating request id and its status.
    pub request_id: Option<String>,
    pub status: Option<ActionStatus>,
    /// Hidden entries are excluded from the safety-valve count.
    pub hidden: bool,
    pub error: bool,
    pub diagnosis: bool,
    pub writing_tests: bool,
    pub test_execution: bool,
    /// Id of the agent entry this one replaces. Set on safety-filter
    /// rewrites; readers that project the transcript (wire conversion,
    /// conclusion tallies) skip superseded entries in favor of the rewrite.
    #[serde(default)]
    pub supersedes: Option<String>,
}

impl TranscriptEntry {
    fn base(origin: EntryOrigin, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            origin,
            content: content.into(),
            action_requests: Vec::new(),
            request_id: None,
            status: None,
            hidden: false,
            error: false,
            diagnosis: false,
            writing_tests: false,
            test_execution: false,
            supersedes: None,
        }
    }

    pub fn agent(content: impl Into<String>, action_requests: Vec<ActionRequest>) -> Self {
        Self {
            action_requests,
            ..Self::base(EntryOrigin::Agent, content)
        }
    }

    pub fn tool_result(result: &ActionResult) -> Self {
        Self {
            request_id: Some(result.request_id.clone()),
            status: Some(result.status),
            error: result.status == ActionStatus::Error,
            ..Self::base(EntryOrigin::ToolResult, result.content.clone())
        }
    }

    pub fn diagnostic(content: impl Into<String>) -> Self {
        Self::base(EntryOrigin::Diagnostic, content)
    }

    pub fn with_error(mut self) -> Self {
        self.error = true;
        self
    }

    pub fn with_diagnosis(mut self) -> Self {
        self.diagnosis = true;
        self
    }

    pub fn with_writing_tests(mut self) -> Self {
        self.writing_tests = true;
        self
    }

    pub fn with_test_execution(mut self) -> Self {
        self.test_execution = true;
        self
    }

    pub fn with_hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_supersedes(mut self, entry_id: impl Into<String>) -> Self {
        self.supersedes = Some(entry_id.into());
        self
    }

    pub fn has_action_requests(&self) -> bool {
        !self.action_requests.is_empty()
    }
}

/// Shared mutable state threaded through a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    transcript: Vec<TranscriptEntry>,
    actions_count: u32,
    diagnose_attempts: u32,
    pub verification: VerificationStatus,
    pub tests_successful: Option<bool>,
    pub changed_files: Vec<String>,
    pub target: RepoTarget,
    pub branch: String,
    pub sandbox_session_id: String,
    pub issue_number: u64,
}

impl WorkflowState {
    pub fn new(target: RepoTarget, branch: impl Into<String>, issue_number: u64) -> Self {
        Self {
            transcript: Vec::new(),
            actions_count: 0,
            diagnose_attempts: 0,
            verification: VerificationStatus::NotStarted,
            tests_successful: None,
            changed_files: Vec::new(),
            target,
            branch: branch.into(),
            sandbox_session_id: Uuid::new_v4().to_string(),
            issue_number,
        }
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn actions_count(&self) -> u32 {
        self.actions_count
    }

    pub fn diagnose_attempts(&self) -> u32 {
        self.diagnose_attempts
    }

    pub fn last_entry(&self) -> Option<&TranscriptEntry> {
        self.transcript.last()
    }

    /// Most recent agent-produced entry, if any.
    pub fn last_agent_entry(&self) -> Option<&TranscriptEntry> {
        self.transcript
            .iter()
            .rev()
            .find(|e| e.origin == EntryOrigin::Agent)
    }

    /// The last `n` entries, oldest first.
    pub fn recent_entries(&self, n: usize) -> &[TranscriptEntry] {
        let start = self.transcript.len().saturating_sub(n);
        &self.transcript[start..]
    }

    /// Number of agent and tool-result entries, excluding hidden ones.
    /// This is the count the safety valve is measured against.
    pub fn qualifying_len(&self) -> usize {
        self.transcript
            .iter()
            .filter(|e| {
                !e.hidden
                    && matches!(e.origin, EntryOrigin::Agent | EntryOrigin::ToolResult)
            })
            .count()
    }

    /// Apply a patch. Entries are appended (never removed or reordered) and
    /// counters only move forward.
    pub fn apply(&mut self, patch: StatePatch) {
        self.transcript.extend(patch.entries);
        self.actions_count += patch.actions_delta;
        self.diagnose_attempts += patch.diagnose_delta;
        if let Some(v) = patch.verification {
            self.verification = v;
        }
        if let Some(s) = patch.tests_successful {
            self.tests_successful = Some(s);
        }
        if let Some(files) = patch.changed_files {
            self.changed_files = files;
        }
    }
}

/// What a step wants changed. Appending to the transcript is the preferred
/// way to record anything; scalar fields are last-writer-wins.
#[derive(Debug, Default)]
pub struct StatePatch {
    pub entries: Vec<TranscriptEntry>,
    pub actions_delta: u32,
    pub diagnose_delta: u32,
    pub verification: Option<VerificationStatus>,
    pub tests_successful: Option<bool>,
    pub changed_files: Option<Vec<String>>,
}

impl StatePatch {
    pub fn entry(entry: TranscriptEntry) -> Self {
        Self {
            entries: vec![entry],
            ..Default::default()
        }
    }

    pub fn push(mut self, entry: TranscriptEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn count_action(mut self) -> Self {
        self.actions_delta += 1;
        self
    }

    pub fn count_diagnose(mut self) -> Self {
        self.diagnose_delta += 1;
        self
    }

    pub fn verification(mut self, status: VerificationStatus) -> Self {
        self.verification = Some(status);
        self
    }

    pub fn tests_successful(mut self, value: bool) -> Self {
        self.tests_successful = Some(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new(
            RepoTarget {
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
            },
            "trellis/issue-42",
            42,
        )
    }

    #[test]
    fn test_apply_appends_and_preserves_order() {
        let mut s = state();
        s.apply(StatePatch::entry(TranscriptEntry::agent("first", vec![])));
        s.apply(
            StatePatch::entry(TranscriptEntry::agent("second", vec![]))
                .push(TranscriptEntry::diagnostic("third")),
        );

        let contents: Vec<&str> = s.transcript().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_counters_only_increase() {
        let mut s = state();
        s.apply(StatePatch::default().count_action().count_action());
        assert_eq!(s.actions_count(), 2);
        s.apply(StatePatch::default().count_diagnose());
        assert_eq!(s.actions_count(), 2);
        assert_eq!(s.diagnose_attempts(), 1);
    }

    #[test]
    fn test_qualifying_len_skips_hidden_and_diagnostic() {
        let mut s = state();
        s.apply(
            StatePatch::entry(TranscriptEntry::agent("visible", vec![]))
                .push(TranscriptEntry::agent("hidden", vec![]).with_hidden())
                .push(TranscriptEntry::diagnostic("internal"))
                .push(TranscriptEntry::tool_result(&ActionResult {
                    request_id: "r1".to_string(),
                    status: ActionStatus::Success,
                    content: "ok".to_string(),
                    truncated: false,
                })),
        );
        assert_eq!(s.qualifying_len(), 2);
    }

    #[test]
    fn test_tool_result_entry_carries_error_flag() {
        let entry = TranscriptEntry::tool_result(&ActionResult {
            request_id: "r1".to_string(),
            status: ActionStatus::Error,
            content: "boom".to_string(),
            truncated: false,
        });
        assert!(entry.error);
        assert_eq!(entry.request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_last_agent_entry_skips_tool_results() {
        let mut s = state();
        s.apply(
            StatePatch::entry(TranscriptEntry::agent("planning", vec![])).push(
                TranscriptEntry::tool_result(&ActionResult {
                    request_id: "r1".to_string(),
                    status: ActionStatus::Success,
                    content: "done".to_string(),
                    truncated: false,
                }),
            ),
        );
        assert_eq!(s.last_agent_entry().unwrap().content, "planning");
    }
}
