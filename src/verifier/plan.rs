use async_trait::async_trait;

use crate::error::Result;
use crate::graph::state::{StatePatch, TranscriptEntry, WorkflowState};
use crate::graph::{Step, StepDirective};
use crate::model::ModelRequest;

use super::StepContext;

const PLAN_PROMPT: &str = "You are a senior test engineer. Review the repository \
context and the conversation so far, then produce a short, concrete test plan: \
which behaviors need coverage, which test files to create or extend, and how the \
tests will be executed. Respond with the plan as plain text. Do not request any \
tools at this stage.";

/// Asks the model for a test plan. A failed model call is recorded as an
/// error entry and routed onward instead of aborting the run; the router
/// sends error outcomes straight to the conclusion.
pub struct GeneratePlanStep;

#[async_trait]
impl Step<StepContext> for GeneratePlanStep {
    async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StepDirective> {
        let system = format!("{PLAN_PROMPT}\n\n{}", super::prompt_context(state));

        let response = ctx
            .model
            .invoke(ModelRequest {
                system,
                transcript: state.transcript(),
                tools: Vec::new(),
            })
            .await;

        let entry = match response {
            Ok(response) => {
                tracing::info!("Generated test plan");
                TranscriptEntry::agent(response.text, Vec::new())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to generate test plan");
                TranscriptEntry::diagnostic(format!("Failed to generate test plan: {e}"))
                    .with_error()
            }
        };

        Ok(StepDirective::Route(StatePatch::entry(entry)))
    }
}
