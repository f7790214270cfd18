use async_trait::async_trait;

use crate::error::Result;
use crate::graph::state::{StatePatch, TranscriptEntry, WorkflowState};
use crate::graph::{Step, StepDirective};
use crate::model::ModelRequest;

use super::StepContext;

const WRITING_PROMPT: &str = "Write the tests called for by the plan above. Use \
the available tools to create or edit test files in the repository. Request every \
file operation you need in this turn. If the plan is already fully covered and \
there is nothing left to write, respond with plain text and no tool requests.";

/// Asks the model to write tests. Produces an agent entry carrying the
/// requested file operations; the router dispatches them for review when
/// present and skips ahead otherwise.
pub struct GenerateWritingActionsStep;

#[async_trait]
impl Step<StepContext> for GenerateWritingActionsStep {
    async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StepDirective> {
        let response = ctx
            .model
            .invoke(ModelRequest {
                system: format!("{WRITING_PROMPT}\n\n{}", super::prompt_context(state)),
                transcript: state.transcript(),
                tools: ctx.dispatcher.definitions(),
            })
            .await?;

        tracing::info!(
            actions = response.action_requests.len(),
            "Generated test-writing actions"
        );

        let mut entry = TranscriptEntry::agent(response.text, response.action_requests);
        if entry.has_action_requests() {
            entry = entry.with_writing_tests();
        }

        Ok(StepDirective::Route(StatePatch::entry(entry)))
    }
}
