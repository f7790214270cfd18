use async_trait::async_trait;

use crate::dispatch::aggregate_success;
use crate::error::{AppError, Result};
use crate::graph::state::{StatePatch, TranscriptEntry, WorkflowState};
use crate::graph::{Step, StepDirective};
use crate::model::ModelRequest;

use super::StepContext;

const EXECUTION_PROMPT: &str = "Run the tests that were written above. Use the \
available tools to execute the test suite and capture its output. If there are \
no tests to run, respond with plain text and no tool requests.";

/// Asks the model how to run the written tests. Entries carrying requests
/// are tagged as test execution so the conclusion can count them.
pub struct GenerateExecutionActionsStep;

#[async_trait]
impl Step<StepContext> for GenerateExecutionActionsStep {
    async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StepDirective> {
        let response = ctx
            .model
            .invoke(ModelRequest {
                system: format!("{EXECUTION_PROMPT}\n\n{}", super::prompt_context(state)),
                transcript: state.transcript(),
                tools: ctx.dispatcher.definitions(),
            })
            .await?;

        tracing::info!(
            actions = response.action_requests.len(),
            "Generated test-execution actions"
        );

        let mut entry = TranscriptEntry::agent(response.text, response.action_requests);
        if entry.has_action_requests() {
            entry = entry.with_test_execution();
        }

        Ok(StepDirective::Route(StatePatch::entry(entry)))
    }
}

/// Dispatches the test-execution batch and records the aggregate success
/// signal the router uses to decide between conclusion and diagnosis.
pub struct TakeExecutionActionsStep;

#[async_trait]
impl Step<StepContext> for TakeExecutionActionsStep {
    async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StepDirective> {
        let entry = state.last_agent_entry().ok_or_else(|| {
            AppError::Dispatch("No agent entry to take execution actions from".to_string())
        })?;

        let outcome = ctx.dispatcher.dispatch(entry, &ctx.session).await?;
        let success = aggregate_success(&outcome.results);

        tracing::info!(success, "Executed test run");

        let mut patch = StatePatch::default().tests_successful(success);
        if let Some(rewritten) = outcome.rewritten_entry {
            patch = patch.push(rewritten.with_hidden());
        }
        patch.actions_delta = outcome.results.len() as u32;
        for result in &outcome.results {
            patch = patch.push(TranscriptEntry::tool_result(result).with_test_execution());
        }

        Ok(StepDirective::Route(patch))
    }
}
