use async_trait::async_trait;

use crate::error::Result;
use crate::graph::state::{StatePatch, TranscriptEntry, WorkflowState};
use crate::graph::{Step, StepDirective};
use crate::model::ModelRequest;

use super::{
    safety_valve_tripped, StepContext, CONCLUSION, GENERATE_WRITING_ACTIONS,
    MAX_DIAGNOSE_ATTEMPTS,
};

const DIAGNOSE_PROMPT: &str = "The most recent test activity failed. Read the \
failing output in the conversation above and diagnose the root cause. Respond \
with a concise diagnosis and the concrete change to attempt next. Do not request \
any tools.";

/// Bounded retry controller. Produces a diagnosis and loops back to test
/// writing while attempts remain; otherwise, or when the model call fails,
/// it jumps to the conclusion rather than propagating the error.
pub struct DiagnoseErrorStep;

#[async_trait]
impl Step<StepContext> for DiagnoseErrorStep {
    async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StepDirective> {
        if safety_valve_tripped(state, ctx.verifier.max_actions) {
            return Ok(StepDirective::Continue {
                next: CONCLUSION,
                patch: StatePatch::default(),
            });
        }

        if state.diagnose_attempts() >= MAX_DIAGNOSE_ATTEMPTS {
            tracing::warn!(
                attempts = state.diagnose_attempts(),
                "Diagnosis retry ceiling reached"
            );
            let entry = TranscriptEntry::diagnostic(format!(
                "Giving up after {} diagnosis attempts",
                state.diagnose_attempts()
            ));
            return Ok(StepDirective::Continue {
                next: CONCLUSION,
                patch: StatePatch::entry(entry),
            });
        }

        let response = ctx
            .model
            .invoke(ModelRequest {
                system: DIAGNOSE_PROMPT.to_string(),
                transcript: state.transcript(),
                tools: Vec::new(),
            })
            .await;

        match response {
            Ok(response) => {
                tracing::info!(
                    attempt = state.diagnose_attempts() + 1,
                    "Produced failure diagnosis"
                );
                let entry = TranscriptEntry::diagnostic(response.text).with_diagnosis();
                Ok(StepDirective::Continue {
                    next: GENERATE_WRITING_ACTIONS,
                    patch: StatePatch::entry(entry).count_diagnose(),
                })
            }
            Err(e) => {
                // Fail soft: a broken diagnosis path must still conclude.
                tracing::error!(error = %e, "Failed to diagnose test failure");
                let entry =
                    TranscriptEntry::diagnostic(format!("Failed to diagnose test failure: {e}"))
                        .with_error();
                Ok(StepDirective::Continue {
                    next: CONCLUSION,
                    patch: StatePatch::entry(entry),
                })
            }
        }
    }
}
