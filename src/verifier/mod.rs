//! Test-verification subgraph: plan, write tests, run them, diagnose
//! failures with bounded retries, then conclude.

pub mod conclusion;
pub mod diagnose;
pub mod execution;
pub mod init;
pub mod plan;
pub mod review;
pub mod writing;

use std::sync::Arc;

use crate::config::VerifierConfig;
use crate::dispatch::ToolDispatcher;
use crate::error::Result;
use crate::graph::state::WorkflowState;
use crate::graph::{GraphBuilder, WorkflowGraph};
use crate::model::ModelClient;
use crate::sandbox::SandboxSession;

pub const INIT: &str = "init";
pub const GENERATE_PLAN: &str = "generate-test-plan";
pub const GENERATE_WRITING_ACTIONS: &str = "gen-writing-tests-actions";
pub const TAKE_REVIEW_ACTIONS: &str = "take-review-actions";
pub const GENERATE_EXECUTION_ACTIONS: &str = "gen-executing-tests-actions";
pub const TAKE_EXECUTION_ACTIONS: &str = "take-executing-tests-actions";
pub const DIAGNOSE_ERROR: &str = "diagnose-error";
pub const CONCLUSION: &str = "conclusion";

/// Ceiling on diagnose-retry cycles. The counter persists across the loop,
/// so a run traverses DiagnoseError -> writing at most this many times.
pub const MAX_DIAGNOSE_ATTEMPTS: u32 = 3;

/// The safety valve trips once the qualifying transcript length reaches
/// this multiple of the configured action ceiling.
pub const SAFETY_VALVE_MULTIPLIER: usize = 2;

/// Everything a verifier step needs to do its work.
pub struct StepContext {
    pub model: Arc<dyn ModelClient>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub session: SandboxSession,
    pub verifier: VerifierConfig,
}

/// Repository context appended to every step prompt.
pub(crate) fn prompt_context(state: &WorkflowState) -> String {
    format!(
        "Repository: {}\nBranch: {}\nIssue: #{}",
        state.target, state.branch, state.issue_number
    )
}

/// Hard termination check that overrides every routing decision.
pub(crate) fn safety_valve_tripped(state: &WorkflowState, max_actions: usize) -> bool {
    let tripped = state.qualifying_len() >= SAFETY_VALVE_MULTIPLIER * max_actions;
    if tripped {
        tracing::warn!(
            qualifying = state.qualifying_len(),
            max_actions,
            "Safety valve tripped, forcing conclusion"
        );
    }
    tripped
}

/// Assemble the verification graph. Routers capture the action ceiling so
/// the safety valve applies uniformly at every routed transition.
pub fn build_graph(config: &VerifierConfig) -> Result<WorkflowGraph<StepContext>> {
    let max_actions = config.max_actions;
    let mut b = GraphBuilder::new(INIT);

    b.register_step(INIT, init::InitStep);
    b.register_step(GENERATE_PLAN, plan::GeneratePlanStep);
    b.register_step(GENERATE_WRITING_ACTIONS, writing::GenerateWritingActionsStep);
    b.register_step(TAKE_REVIEW_ACTIONS, review::TakeReviewActionsStep);
    b.register_step(
        GENERATE_EXECUTION_ACTIONS,
        execution::GenerateExecutionActionsStep,
    );
    b.register_step(TAKE_EXECUTION_ACTIONS, execution::TakeExecutionActionsStep);
    b.register_step(DIAGNOSE_ERROR, diagnose::DiagnoseErrorStep);
    b.register_step(CONCLUSION, conclusion::ConclusionStep);

    b.register_router(
        GENERATE_PLAN,
        &[GENERATE_WRITING_ACTIONS, CONCLUSION],
        move |state| {
            if safety_valve_tripped(state, max_actions)
                || state.last_entry().is_some_and(|e| e.error)
            {
                CONCLUSION
            } else {
                GENERATE_WRITING_ACTIONS
            }
        },
    );

    b.register_router(
        GENERATE_WRITING_ACTIONS,
        &[TAKE_REVIEW_ACTIONS, GENERATE_EXECUTION_ACTIONS, CONCLUSION],
        move |state| {
            if safety_valve_tripped(state, max_actions) {
                CONCLUSION
            } else if state
                .last_agent_entry()
                .is_some_and(|e| e.has_action_requests())
            {
                TAKE_REVIEW_ACTIONS
            } else {
                GENERATE_EXECUTION_ACTIONS
            }
        },
    );

    b.register_router(
        TAKE_REVIEW_ACTIONS,
        &[DIAGNOSE_ERROR, GENERATE_EXECUTION_ACTIONS, CONCLUSION],
        move |state| {
            if safety_valve_tripped(state, max_actions) {
                CONCLUSION
            } else if state.recent_entries(3).iter().any(|e| e.error) {
                DIAGNOSE_ERROR
            } else {
                GENERATE_EXECUTION_ACTIONS
            }
        },
    );

    b.register_router(
        GENERATE_EXECUTION_ACTIONS,
        &[TAKE_EXECUTION_ACTIONS, CONCLUSION],
        move |state| {
            if safety_valve_tripped(state, max_actions) {
                CONCLUSION
            } else if state
                .last_agent_entry()
                .is_some_and(|e| e.has_action_requests())
            {
                TAKE_EXECUTION_ACTIONS
            } else {
                CONCLUSION
            }
        },
    );

    b.register_router(
        TAKE_EXECUTION_ACTIONS,
        &[DIAGNOSE_ERROR, CONCLUSION],
        move |state| {
            if safety_valve_tripped(state, max_actions) {
                CONCLUSION
            } else if state.tests_successful == Some(false) {
                DIAGNOSE_ERROR
            } else {
                CONCLUSION
            }
        },
    );

    b.compile()
}
