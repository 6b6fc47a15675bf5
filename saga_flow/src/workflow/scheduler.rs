//! Concurrent step scheduler and compensation engine.
//!
//! Drains the dependency graph to completion or failure: steps whose
//! dependencies are all resolved move from the ready set into a
//! bounded running set, and each resolved outcome re-scans dependents
//! for readiness. Failures are handed to the compensation engine,
//! whose verdict decides between retry, skip-forward, continue with a
//! substitute value, or abort.
//!
//! # Concurrency model
//!
//! All step work is multiplexed on the tokio runtime; "parallel"
//! steps interleave at their own suspension points. Guarantees:
//! - a step never starts before every dependency has a resolved
//!   outcome
//! - the running set never exceeds the concurrency bound
//! - the outcome map and rollback log are owned here and only ever
//!   appended to
//!
//! A per-step timeout races the step against a timer and surfaces
//! expiry as a normal step failure, subject to compensation. The
//! workflow-level timeout stops issuing new steps once elapsed and
//! fails the run, but already-running steps drain normally and their
//! outcomes are still recorded.

use crate::workflow::args::{resolve_arguments, StepArgs};
use crate::workflow::cancellation::CancellationToken;
use crate::workflow::context::WorkflowContext;
use crate::workflow::dag::DependencyGraph;
use crate::workflow::middleware::MiddlewarePipeline;
use crate::workflow::rollback::RollbackLog;
use crate::workflow::state::WorkflowErrorRecord;
use crate::workflow::step::{CompensationVerdict, Step, StepError, StepOutcome};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one launched step task, reported back to the scheduler.
struct StepCompletion {
    name: String,
    args: StepArgs,
    result: Result<Value, StepError>,
}

/// Everything the scheduler produced for one run.
pub(crate) struct SchedulerOutput {
    pub(crate) outcomes: HashMap<String, StepOutcome>,
    pub(crate) errors: Vec<WorkflowErrorRecord>,
    pub(crate) log: RollbackLog,
    pub(crate) aborted: bool,
    pub(crate) timed_out: bool,
    pub(crate) cancelled: bool,
}

/// Executes one workflow run over a validated graph.
pub(crate) struct Scheduler<'a> {
    steps: &'a HashMap<String, Step>,
    graph: &'a DependencyGraph,
    inputs: &'a HashMap<String, Value>,
    pipeline: &'a MiddlewarePipeline,
    ctx: &'a Arc<WorkflowContext>,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,

    remaining: HashMap<String, usize>,
    ready: VecDeque<String>,
    retries: HashMap<String, u32>,
    outcomes: HashMap<String, StepOutcome>,
    errors: Vec<WorkflowErrorRecord>,
    log: RollbackLog,
    aborted: bool,
    timed_out: bool,
    cancelled: bool,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        steps: &'a HashMap<String, Step>,
        order: &'a [String],
        graph: &'a DependencyGraph,
        inputs: &'a HashMap<String, Value>,
        pipeline: &'a MiddlewarePipeline,
        ctx: &'a Arc<WorkflowContext>,
        max_concurrency: Option<usize>,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Self {
        let remaining = graph.in_degrees();
        // Seed the ready set in declaration order for deterministic
        // launch order among initially-independent steps.
        let ready = order
            .iter()
            .filter(|name| remaining.get(*name).copied() == Some(0))
            .cloned()
            .collect();

        Self {
            steps,
            graph,
            inputs,
            pipeline,
            ctx,
            max_concurrency,
            timeout,
            cancel,
            remaining,
            ready,
            retries: HashMap::new(),
            outcomes: HashMap::new(),
            errors: Vec::new(),
            log: RollbackLog::default(),
            aborted: false,
            timed_out: false,
            cancelled: false,
        }
    }

    /// Runs the graph to completion or failure.
    pub(crate) async fn run(mut self) -> SchedulerOutput {
        let mut running: JoinSet<StepCompletion> = JoinSet::new();
        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            if !self.halted() {
                self.launch_ready(&mut running);
            }

            if running.is_empty() {
                // Nothing in flight: either every reachable step has
                // resolved, or the run halted with unstarted steps.
                break;
            }

            let joined = match deadline {
                Some(at) if !self.timed_out => {
                    match tokio::time::timeout_at(at, running.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            self.workflow_timed_out();
                            continue;
                        }
                    }
                }
                _ => running.join_next().await,
            };

            let Some(join_result) = joined else { continue };
            match join_result {
                Ok(completion) => self.handle_completion(completion).await,
                Err(join_err) => {
                    // A step task panicked; the step cannot be
                    // compensated, so the run aborts.
                    warn!(workflow = self.ctx.id(), error = %join_err, "step task panicked");
                    self.errors.push(WorkflowErrorRecord::workflow(format!(
                        "step task panicked: {join_err}"
                    )));
                    self.aborted = true;
                }
            }
        }

        SchedulerOutput {
            outcomes: self.outcomes,
            errors: self.errors,
            log: self.log,
            aborted: self.aborted,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
        }
    }

    fn halted(&self) -> bool {
        self.aborted || self.timed_out || self.cancelled
    }

    /// Moves ready steps into the running set, up to the bound.
    fn launch_ready(&mut self, running: &mut JoinSet<StepCompletion>) {
        let cap = self.max_concurrency.unwrap_or(usize::MAX).max(1);

        while running.len() < cap && !self.ready.is_empty() {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    debug!(workflow = self.ctx.id(), "cancellation requested, halting launches");
                    self.cancelled = true;
                    self.errors
                        .push(WorkflowErrorRecord::workflow("Workflow cancelled"));
                    self.pipeline
                        .notify_error(self.ctx, None, "Workflow cancelled");
                    return;
                }
            }

            let name = self
                .ready
                .pop_front()
                .expect("ready set checked non-empty");
            self.pipeline.notify_before_step(self.ctx, &name);

            let step = &self.steps[&name];
            let args = resolve_arguments(step, self.inputs, &self.outcomes);
            debug!(workflow = self.ctx.id(), step = %name, "launching step");

            let action = Arc::clone(&step.action);
            let timeout = step.timeout;
            let ctx = Arc::clone(self.ctx);
            running.spawn(async move {
                let fut = action.run(args.clone(), ctx);
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(StepError::Timeout {
                            step: name.clone(),
                            timeout: limit,
                        }),
                    },
                    None => fut.await,
                };
                StepCompletion { name, args, result }
            });
        }
    }

    fn workflow_timed_out(&mut self) {
        let timeout = self.timeout.expect("deadline implies timeout config");
        warn!(workflow = self.ctx.id(), ?timeout, "workflow deadline elapsed");
        self.timed_out = true;
        let message = format!("Workflow exceeded timeout limit of {timeout:?}");
        self.pipeline.notify_error(self.ctx, None, &message);
        self.errors.push(WorkflowErrorRecord::workflow(message));
    }

    async fn handle_completion(&mut self, completion: StepCompletion) {
        let StepCompletion { name, args, result } = completion;
        match result {
            Ok(value) => {
                debug!(workflow = self.ctx.id(), step = %name, "step succeeded");
                self.finish_step(name, StepOutcome::succeeded(value), args, true);
            }
            Err(err) if self.halted() => {
                // Draining after a halt: record the failure as-is, no
                // recovery can change the run's fate anymore.
                let message = err.to_string();
                self.pipeline.notify_error(self.ctx, Some(&name), &message);
                self.errors
                    .push(WorkflowErrorRecord::for_step(&name, &message));
                self.finish_step(name, StepOutcome::failed(message), args, false);
            }
            Err(err) => self.compensate_failure(name, err, args).await,
        }
    }

    /// Runs the per-step failure state machine.
    ///
    /// `running → failed → compensating → {retrying | resolved-skip |
    /// resolved-continue | aborting}`. Without a compensation handler
    /// the verdict defaults to `Abort`; a handler that itself fails is
    /// an implicit `Abort`.
    async fn compensate_failure(&mut self, name: String, err: StepError, args: StepArgs) {
        let message = err.to_string();
        self.pipeline.notify_error(self.ctx, Some(&name), &message);

        let step = &self.steps[&name];
        let verdict = match &step.compensator {
            None => {
                debug!(workflow = self.ctx.id(), step = %name, "no compensation handler");
                CompensationVerdict::Abort
            }
            Some(compensator) => {
                match compensator
                    .compensate(err, args.clone(), Arc::clone(self.ctx))
                    .await
                {
                    Ok(verdict) => verdict,
                    Err(comp_err) => {
                        warn!(workflow = self.ctx.id(), step = %name, error = %comp_err, "compensation handler failed");
                        self.errors.push(WorkflowErrorRecord::for_step(
                            &name,
                            format!("compensation failed: {comp_err}"),
                        ));
                        CompensationVerdict::Abort
                    }
                }
            }
        };

        match verdict {
            CompensationVerdict::Retry => {
                let attempts = self.retries.entry(name.clone()).or_insert(0);
                if *attempts < step.max_retries {
                    *attempts += 1;
                    debug!(workflow = self.ctx.id(), step = %name, attempt = *attempts, "retry verdict, resubmitting");
                    self.ready.push_back(name);
                } else {
                    warn!(workflow = self.ctx.id(), step = %name, "retries exhausted, aborting");
                    self.abort_with(name, message, args);
                }
            }
            CompensationVerdict::Skip => {
                debug!(workflow = self.ctx.id(), step = %name, "skip verdict, resolving with null");
                self.finish_step(name, StepOutcome::skipped(), args, false);
            }
            CompensationVerdict::Continue(value) => {
                debug!(workflow = self.ctx.id(), step = %name, "continue verdict, resolving with substitute value");
                self.finish_step(name, StepOutcome::succeeded(value), args, false);
            }
            CompensationVerdict::Abort => {
                warn!(workflow = self.ctx.id(), step = %name, error = %message, "abort verdict");
                self.abort_with(name, message, args);
            }
        }
    }

    fn abort_with(&mut self, name: String, message: String, args: StepArgs) {
        self.errors
            .push(WorkflowErrorRecord::for_step(&name, &message));
        self.finish_step(name, StepOutcome::failed(message), args, false);
        self.aborted = true;
    }

    /// Records a step's final outcome and re-scans its dependents.
    ///
    /// Only steps that succeeded through normal execution enter the
    /// rollback log; Skip- and Continue-resolved steps performed no
    /// real side effect through `run` and are not rollback-eligible.
    fn finish_step(
        &mut self,
        name: String,
        outcome: StepOutcome,
        args: StepArgs,
        rollback_eligible: bool,
    ) {
        if rollback_eligible && outcome.success {
            let undoer = self.steps[&name].undoer.clone();
            self.log.record(&name, outcome.clone(), args, undoer);
        }

        self.ctx.record_outcome(&name, outcome.clone());
        self.pipeline.notify_after_step(self.ctx, &name, &outcome);

        for dependent in self.graph.dependents(&name) {
            if let Some(count) = self.remaining.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.push_back(dependent);
                }
            }
        }

        self.outcomes.insert(name, outcome);
    }
}
