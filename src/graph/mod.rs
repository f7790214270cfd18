pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use state::{StatePatch, WorkflowState};

/// What a step wants the engine to do next.
#[derive(Debug)]
pub enum StepDirective {
    /// Apply the patch and jump straight to a named step, bypassing any
    /// router registered for the current step.
    Continue {
        next: &'static str,
        patch: StatePatch,
    },
    /// Apply the patch and let the current step's registered router pick
    /// the next step from the patched state.
    Route(StatePatch),
    /// Apply the patch and end the run.
    Terminal(StatePatch),
}

/// A named unit of work in the workflow graph.
#[async_trait]
pub trait Step<C>: Send + Sync {
    async fn run(&self, state: &WorkflowState, ctx: &C) -> Result<StepDirective>;
}

type SelectFn = Box<dyn Fn(&WorkflowState) -> &'static str + Send + Sync>;

struct Router {
    select: SelectFn,
    targets: Vec<&'static str>,
}

pub struct GraphBuilder<C> {
    entry: &'static str,
    steps: HashMap<&'static str, Arc<dyn Step<C>>>,
    routers: HashMap<&'static str, Router>,
}

impl<C> GraphBuilder<C> {
    pub fn new(entry: &'static str) -> Self {
        Self {
            entry,
            steps: HashMap::new(),
            routers: HashMap::new(),
        }
    }

    pub fn register_step(&mut self, name: &'static str, step: impl Step<C> + 'static) {
        self.steps.insert(name, Arc::new(step));
    }

    /// Register a router for `step`. `targets` declares every step the
    /// router may select; `compile` rejects targets that are not registered
    /// steps, and at run time a selection outside this list is fatal.
    pub fn register_router<F>(&mut self, step: &'static str, targets: &[&'static str], select: F)
    where
        F: Fn(&WorkflowState) -> &'static str + Send + Sync + 'static,
    {
        self.routers.insert(
            step,
            Router {
                select: Box::new(select),
                targets: targets.to_vec(),
            },
        );
    }

    pub fn compile(self) -> Result<WorkflowGraph<C>> {
        if !self.steps.contains_key(self.entry) {
            return Err(AppError::Routing(format!(
                "Entry step not registered: {}",
                self.entry
            )));
        }
        for (step, router) in &self.routers {
            if !self.steps.contains_key(step) {
                return Err(AppError::Routing(format!(
                    "Router registered for unknown step: {step}"
                )));
            }
            for target in &router.targets {
                if !self.steps.contains_key(target) {
                    return Err(AppError::Routing(format!(
                        "Router for '{step}' declares unregistered target: {target}"
                    )));
                }
            }
        }
        Ok(WorkflowGraph {
            entry: self.entry,
            steps: self.steps,
            routers: self.routers,
        })
    }
}

/// A compiled workflow graph. Steps execute strictly sequentially; the
/// engine performs no cycle detection, so deliberate loops must be bounded
/// by the steps themselves.
pub struct WorkflowGraph<C> {
    entry: &'static str,
    steps: HashMap<&'static str, Arc<dyn Step<C>>>,
    routers: HashMap<&'static str, Router>,
}

impl<C: Send + Sync> WorkflowGraph<C> {
    /// Execute a run from `initial` until a terminal directive.
    pub async fn run(&self, initial: WorkflowState, ctx: &C) -> Result<WorkflowState> {
        let mut state = initial;
        let mut current = self.entry;

        loop {
            let step = Arc::clone(self.steps.get(current).ok_or_else(|| {
                AppError::Routing(format!("Directive names unregistered step: {current}"))
            })?);

            tracing::info!(step = current, "Executing step");
            let directive = step.run(&state, ctx).await?;

            match directive {
                StepDirective::Terminal(patch) => {
                    state.apply(patch);
                    tracing::info!(step = current, "Run reached terminal step");
                    return Ok(state);
                }
                StepDirective::Continue { next, patch } => {
                    state.apply(patch);
                    if !self.steps.contains_key(next) {
                        return Err(AppError::Routing(format!(
                            "Step '{current}' jumped to unregistered step: {next}"
                        )));
                    }
                    tracing::debug!(from = current, to = next, "Step-level jump");
                    current = next;
                }
                StepDirective::Route(patch) => {
                    state.apply(patch);
                    let router = self.routers.get(current).ok_or_else(|| {
                        AppError::Routing(format!("No router registered for step: {current}"))
                    })?;
                    let next = (router.select)(&state);
                    if !router.targets.contains(&next) {
                        return Err(AppError::Routing(format!(
                            "Router for '{current}' selected undeclared target: {next}"
                        )));
                    }
                    tracing::debug!(from = current, to = next, "Routed");
                    current = next;
                }
            }
        }
    }
}
