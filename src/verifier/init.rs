use async_trait::async_trait;

use crate::error::Result;
use crate::graph::state::{StatePatch, TranscriptEntry, VerificationStatus, WorkflowState};
use crate::graph::{Step, StepDirective};

use super::{StepContext, GENERATE_PLAN};

/// Opens the run: marks verification in progress and records a hidden
/// banner entry so the transcript carries the run's identity.
pub struct InitStep;

#[async_trait]
impl Step<StepContext> for InitStep {
    async fn run(&self, state: &WorkflowState, _ctx: &StepContext) -> Result<StepDirective> {
        tracing::info!(
            target = %state.target,
            branch = %state.branch,
            issue = state.issue_number,
            "Starting test verification"
        );

        let banner = TranscriptEntry::diagnostic(format!(
            "Starting test verification for {}#{} on branch {}",
            state.target, state.issue_number, state.branch
        ))
        .with_hidden();

        Ok(StepDirective::Continue {
            next: GENERATE_PLAN,
            patch: StatePatch::entry(banner).verification(VerificationStatus::InProgress),
        })
    }
}
