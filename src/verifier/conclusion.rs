use async_trait::async_trait;

use crate::error::Result;
use crate::graph::state::{
    EntryOrigin, StatePatch, TranscriptEntry, VerificationStatus, WorkflowState,
};
use crate::graph::{Step, StepDirective};

use super::StepContext;

/// Sole terminal step. Tallies what the run produced, derives the final
/// verification status, and leaves a human-readable report entry.
pub struct ConclusionStep;

#[async_trait]
impl Step<StepContext> for ConclusionStep {
    async fn run(&self, state: &WorkflowState, _ctx: &StepContext) -> Result<StepDirective> {
        // Safety-filter rewrites supersede their originals; count only the
        // requests that actually survived to execution.
        let superseded: std::collections::HashSet<&str> = state
            .transcript()
            .iter()
            .filter_map(|e| e.supersedes.as_deref())
            .collect();
        let created: usize = state
            .transcript()
            .iter()
            .filter(|e| {
                e.writing_tests
                    && e.origin == EntryOrigin::Agent
                    && !superseded.contains(e.id.as_str())
            })
            .map(|e| e.action_requests.len())
            .sum();
        let executed = state
            .transcript()
            .iter()
            .filter(|e| e.test_execution && e.origin == EntryOrigin::ToolResult)
            .count();
        let errors = state.transcript().iter().filter(|e| e.error).count();

        let status = if created == 0 {
            VerificationStatus::Failed
        } else if state.tests_successful == Some(true) {
            VerificationStatus::Completed
        } else {
            VerificationStatus::Failed
        };

        let report = format!(
            "Test verification finished for {}#{}: {:?}. Tests created: {created}, \
             execution results: {executed}, errors: {errors}, success signal: {}.",
            state.target,
            state.issue_number,
            status,
            match state.tests_successful {
                Some(v) => v.to_string(),
                None => "none".to_string(),
            }
        );

        tracing::info!(
            ?status,
            created,
            executed,
            errors,
            "Concluding test verification"
        );

        Ok(StepDirective::Terminal(
            StatePatch::entry(TranscriptEntry::diagnostic(report)).verification(status),
        ))
    }
}
