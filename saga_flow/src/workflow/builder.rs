//! Fluent workflow construction and the executable workflow handle.
//!
//! [`WorkflowBuilder`] accumulates declared inputs, steps, middleware
//! and configuration, then validates the whole definition in
//! [`build`](WorkflowBuilder::build): duplicate names, undeclared or
//! circular dependencies and an unknown return step are all rejected
//! before anything can run. The resulting [`Workflow`] is an immutable
//! definition that can be executed any number of times; each `execute`
//! call gets a fresh context and outcome set.

use crate::workflow::args::ArgumentSource;
use crate::workflow::cancellation::{CancellationToken, CancellationTokenSource};
use crate::workflow::context::WorkflowContext;
use crate::workflow::dag::{ConstructionError, DependencyGraph};
use crate::workflow::middleware::{Middleware, MiddlewarePipeline};
use crate::workflow::rollback::{run_rollback, RollbackLog, RollbackReport};
use crate::workflow::scheduler::Scheduler;
use crate::workflow::state::{WorkflowResult, WorkflowState};
use crate::workflow::step::Step;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One declared workflow input.
#[derive(Clone, Debug)]
pub struct InputSpec {
    pub(crate) name: String,
    pub(crate) required: bool,
    pub(crate) default: Option<Value>,
}

impl InputSpec {
    /// Declares a required input with no default.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    /// Declares an optional input, applied as `default` when absent.
    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// Execution limits for one workflow definition.
#[derive(Clone, Debug, Default)]
pub struct WorkflowConfig {
    /// Upper bound on concurrently running steps (None = unbounded)
    pub max_concurrency: Option<usize>,
    /// Wall-clock limit for a whole run (None = unlimited)
    pub timeout: Option<Duration>,
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many steps may run at once.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Sets the workflow-level deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fluent builder for [`Workflow`].
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowBuilder::new("provision")
///     .input(InputSpec::required("order_id"))
///     .step(reserve)
///     .step(charge)
///     .returns("charge")
///     .configure(WorkflowConfig::new().with_max_concurrency(4))
///     .build()?;
/// ```
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<Step>,
    inputs: Vec<InputSpec>,
    middleware: Vec<Arc<dyn Middleware>>,
    config: WorkflowConfig,
    return_step: Option<String>,
}

impl WorkflowBuilder {
    /// Starts an empty workflow definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            inputs: Vec::new(),
            middleware: Vec::new(),
            config: WorkflowConfig::default(),
            return_step: None,
        }
    }

    /// Starts a definition from a linear chain: each step depends on
    /// the one before it, in the order given.
    pub fn chain(name: impl Into<String>, steps: Vec<Step>) -> Self {
        let mut builder = Self::new(name);
        let mut previous: Option<String> = None;
        for mut step in steps {
            if let Some(prev) = &previous {
                if !step.dependencies.contains(prev) {
                    step.dependencies.push(prev.clone());
                }
            }
            previous = Some(step.name.clone());
            builder.steps.push(step);
        }
        builder
    }

    /// Declares an input.
    pub fn input(mut self, spec: InputSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Adds a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Registers a middleware observer. Observers run in registration
    /// order.
    pub fn middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.middleware_arc(Arc::new(middleware))
    }

    /// Registers a shared middleware observer, for callers that keep a
    /// handle to it.
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Replaces the execution configuration.
    pub fn configure(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Designates the step whose output becomes the workflow's return
    /// value.
    pub fn returns(mut self, step: impl Into<String>) -> Self {
        self.return_step = Some(step.into());
        self
    }

    /// Validates the definition and produces an executable workflow.
    ///
    /// `FromStep` argument sources are folded into dependencies here,
    /// so a step never launches before a step it reads from.
    ///
    /// # Errors
    ///
    /// - `ConstructionError::EmptyWorkflow` - no steps declared
    /// - `ConstructionError::DuplicateStep` - two steps share a name
    /// - `ConstructionError::MissingDependency` - dependency on an
    ///   undeclared step
    /// - `ConstructionError::CircularDependency` - the graph has a cycle
    /// - `ConstructionError::UnknownReturnStep` - `returns` names an
    ///   undeclared step
    pub fn build(mut self) -> Result<Workflow, ConstructionError> {
        if self.steps.is_empty() {
            return Err(ConstructionError::EmptyWorkflow);
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.clone()) {
                return Err(ConstructionError::DuplicateStep(step.name.clone()));
            }
        }

        for step in &mut self.steps {
            let implicit: Vec<String> = step
                .arguments
                .iter()
                .filter_map(|(_, source)| match source {
                    ArgumentSource::FromStep(dep) => Some(dep.clone()),
                    _ => None,
                })
                .collect();
            for dep in implicit {
                if !step.dependencies.contains(&dep) {
                    step.dependencies.push(dep);
                }
            }
            step.dependencies.dedup();
        }

        let graph = DependencyGraph::build(&self.steps)?;

        if let Some(return_step) = &self.return_step {
            if !seen.contains(return_step) {
                return Err(ConstructionError::UnknownReturnStep(return_step.clone()));
            }
        }

        debug!(workflow = %self.name, steps = graph.step_count(), "workflow definition validated");

        let order: Vec<String> = self.steps.iter().map(|s| s.name.clone()).collect();
        let steps = self
            .steps
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        Ok(Workflow {
            name: self.name,
            steps,
            order,
            graph,
            inputs: self.inputs,
            pipeline: MiddlewarePipeline::new(self.middleware),
            config: self.config,
            return_step: self.return_step,
            cancellation: Mutex::new(CancellationTokenSource::new()),
            state: Mutex::new(WorkflowState::Pending),
            pending_rollback: Mutex::new(None),
        })
    }
}

/// Rollback material retained from the most recent run.
struct PendingRollback {
    log: RollbackLog,
    ctx: Arc<WorkflowContext>,
}

/// An immutable, validated workflow definition.
///
/// Each [`execute`](Self::execute) call runs the whole graph with a
/// fresh context. The handle also exposes cooperative
/// [`cancel`](Self::cancel) and post-run manual
/// [`rollback`](Self::rollback).
pub struct Workflow {
    name: String,
    steps: HashMap<String, Step>,
    order: Vec<String>,
    graph: DependencyGraph,
    inputs: Vec<InputSpec>,
    pipeline: MiddlewarePipeline,
    config: WorkflowConfig,
    return_step: Option<String>,
    cancellation: Mutex<CancellationTokenSource>,
    state: Mutex<WorkflowState>,
    pending_rollback: Mutex<Option<PendingRollback>>,
}

impl Workflow {
    /// Returns the workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of declared steps.
    pub fn step_count(&self) -> usize {
        self.order.len()
    }

    /// Returns the state of the most recent (or current) run.
    pub fn last_state(&self) -> WorkflowState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Returns a token observing the current run's cancellation state.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation
            .lock()
            .expect("cancellation lock poisoned")
            .token()
    }

    /// Requests cooperative cancellation of the in-flight run: no new
    /// steps launch, running steps drain, and the run fails with a
    /// cancellation error. Idempotent. Each `execute` call starts with
    /// a fresh cancellation state.
    pub fn cancel(&self) {
        info!(workflow = %self.name, "cancellation requested");
        self.cancellation
            .lock()
            .expect("cancellation lock poisoned")
            .cancel();
    }

    /// Runs the workflow once with the given input payload.
    ///
    /// Step-level failures never surface as an `Err` here; they are
    /// reported through the result's `state` and `errors`. The only
    /// error is a missing required input, raised before any step runs.
    ///
    /// On an abort verdict the rollback manager runs automatically and
    /// the run resolves as `Failed`. Timeout and cancellation also
    /// resolve as `Failed`, with the rollback log retained; the
    /// `RolledBack` state is reached only through an explicit
    /// [`rollback`](Self::rollback) call.
    pub async fn execute(
        &self,
        inputs: HashMap<String, Value>,
    ) -> Result<WorkflowResult, ConstructionError> {
        let inputs = self.validated_inputs(inputs)?;

        // Fresh cancellation state per run; a cancel from an earlier
        // run must not leak into this one.
        let cancel_token = {
            let mut source = self
                .cancellation
                .lock()
                .expect("cancellation lock poisoned");
            *source = CancellationTokenSource::new();
            source.token()
        };

        let ctx = Arc::new(WorkflowContext::new());
        self.set_state(WorkflowState::Executing);
        info!(workflow = %self.name, run = ctx.id(), steps = self.order.len(), "workflow starting");
        self.pipeline.notify_before_workflow(&ctx);

        let started = std::time::Instant::now();
        let output = Scheduler::new(
            &self.steps,
            &self.order,
            &self.graph,
            &inputs,
            &self.pipeline,
            &ctx,
            self.config.max_concurrency,
            self.config.timeout,
            Some(cancel_token),
        )
        .run()
        .await;

        let mut log = output.log;
        let mut errors = output.errors;

        let state = if output.aborted {
            // Saga backward recovery: undo succeeded steps in reverse
            // completion order.
            let report = run_rollback(&mut log, &ctx).await;
            for (step, message) in &report.failed {
                errors.push(crate::workflow::state::WorkflowErrorRecord::for_step(
                    step,
                    format!("rollback failed: {message}"),
                ));
            }
            warn!(
                workflow = %self.name,
                run = ctx.id(),
                undone = report.undone.len(),
                failed = report.failed.len(),
                "workflow aborted and rolled back"
            );
            WorkflowState::Failed
        } else if output.timed_out || output.cancelled {
            WorkflowState::Failed
        } else {
            WorkflowState::Completed
        };

        let return_value = self
            .return_step
            .as_ref()
            .and_then(|step| output.outcomes.get(step))
            .map(|outcome| outcome.value());

        let result = WorkflowResult {
            id: ctx.id().to_string(),
            state,
            outcomes: output.outcomes,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
            return_value,
        };

        self.set_state(state);
        self.pipeline.notify_after_workflow(&ctx, &result);
        info!(
            workflow = %self.name,
            run = %result.id,
            state = ?result.state,
            duration_ms = result.duration_ms,
            "workflow finished"
        );

        *self
            .pending_rollback
            .lock()
            .expect("rollback lock poisoned") = Some(PendingRollback { log, ctx });

        Ok(result)
    }

    /// Manually undoes the most recent run's succeeded steps, in
    /// reverse completion order.
    ///
    /// The log drains as it is processed, so calling this again (or
    /// after an automatic rollback) is a no-op that reports zero
    /// entries.
    pub async fn rollback(&self) -> RollbackReport {
        let pending = self
            .pending_rollback
            .lock()
            .expect("rollback lock poisoned")
            .take();

        let Some(mut pending) = pending else {
            return RollbackReport::default();
        };

        let report = run_rollback(&mut pending.log, &pending.ctx).await;
        if report.total_processed() > 0 {
            self.set_state(WorkflowState::RolledBack);
        }

        *self
            .pending_rollback
            .lock()
            .expect("rollback lock poisoned") = Some(pending);

        report
    }

    /// Applies declared defaults and enforces required inputs.
    fn validated_inputs(
        &self,
        mut inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ConstructionError> {
        for spec in &self.inputs {
            if inputs.contains_key(&spec.name) {
                continue;
            }
            match (&spec.default, spec.required) {
                (Some(default), _) => {
                    inputs.insert(spec.name.clone(), default.clone());
                }
                (None, true) => {
                    return Err(ConstructionError::MissingInput(spec.name.clone()));
                }
                (None, false) => {}
            }
        }
        Ok(inputs)
    }

    fn set_state(&self, state: WorkflowState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.order)
            .field("config", &self.config)
            .field("return_step", &self.return_step)
            .finish()
    }
}
