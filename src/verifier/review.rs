use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::graph::state::{StatePatch, TranscriptEntry, WorkflowState};
use crate::graph::{Step, StepDirective};

use super::StepContext;

/// Dispatches the test-writing action batch. Results land in the
/// transcript in request order; the router then inspects the tail of the
/// transcript for error markers to decide whether a diagnosis is needed.
pub struct TakeReviewActionsStep;

#[async_trait]
impl Step<StepContext> for TakeReviewActionsStep {
    async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StepDirective> {
        let entry = state.last_agent_entry().ok_or_else(|| {
            AppError::Dispatch("No agent entry to take review actions from".to_string())
        })?;

        let outcome = ctx.dispatcher.dispatch(entry, &ctx.session).await?;

        let mut patch = StatePatch::default();
        if let Some(rewritten) = outcome.rewritten_entry {
            // Recorded hidden so the rewrite does not inflate the
            // safety-valve count or the created-test tally.
            patch = patch.push(rewritten.with_hidden());
        }
        patch.actions_delta = outcome.results.len() as u32;
        for result in &outcome.results {
            patch = patch.push(TranscriptEntry::tool_result(result));
        }

        Ok(StepDirective::Route(patch))
    }
}
