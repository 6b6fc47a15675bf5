//! Middleware pipeline of lifecycle observers.
//!
//! Observers are invoked synchronously, in registration order, around
//! workflow start/end and each step's start/end/error. Hooks may stash
//! data in `context` metadata but must not mutate step outcomes. A
//! hook that fails is reported through `handle_error` and never aborts
//! the workflow by itself.

use crate::workflow::context::WorkflowContext;
use crate::workflow::state::WorkflowResult;
use crate::workflow::step::StepOutcome;
use std::sync::Arc;
use tracing::warn;

/// A lifecycle observer. All hooks are optional.
///
/// # Example
///
/// ```ignore
/// struct Correlator;
///
/// impl Middleware for Correlator {
///     fn before_workflow(&self, ctx: &WorkflowContext) -> anyhow::Result<()> {
///         ctx.set_metadata("correlation_id", serde_json::json!(ctx.trace_id()));
///         Ok(())
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Invoked once before any step is scheduled.
    fn before_workflow(&self, _ctx: &WorkflowContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked before a step launches (including each retry launch).
    fn before_step(&self, _ctx: &WorkflowContext, _step: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked once per step with its resolved outcome.
    fn after_step(
        &self,
        _ctx: &WorkflowContext,
        _step: &str,
        _outcome: &StepOutcome,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked once after the run resolves, with the assembled result.
    fn after_workflow(&self, _ctx: &WorkflowContext, _result: &WorkflowResult) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked for step failures and for hook failures. Infallible.
    fn handle_error(&self, _ctx: &WorkflowContext, _step: Option<&str>, _error: &str) {}
}

/// Ordered list of observers, dispatched by the scheduler.
#[derive(Clone, Default)]
pub(crate) struct MiddlewarePipeline {
    observers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub(crate) fn new(observers: Vec<Arc<dyn Middleware>>) -> Self {
        Self { observers }
    }

    pub(crate) fn notify_before_workflow(&self, ctx: &WorkflowContext) {
        for observer in &self.observers {
            if let Err(e) = observer.before_workflow(ctx) {
                self.hook_failed(ctx, None, &e);
            }
        }
    }

    pub(crate) fn notify_before_step(&self, ctx: &WorkflowContext, step: &str) {
        for observer in &self.observers {
            if let Err(e) = observer.before_step(ctx, step) {
                self.hook_failed(ctx, Some(step), &e);
            }
        }
    }

    pub(crate) fn notify_after_step(&self, ctx: &WorkflowContext, step: &str, outcome: &StepOutcome) {
        for observer in &self.observers {
            if let Err(e) = observer.after_step(ctx, step, outcome) {
                self.hook_failed(ctx, Some(step), &e);
            }
        }
    }

    pub(crate) fn notify_after_workflow(&self, ctx: &WorkflowContext, result: &WorkflowResult) {
        for observer in &self.observers {
            if let Err(e) = observer.after_workflow(ctx, result) {
                self.hook_failed(ctx, None, &e);
            }
        }
    }

    /// Reports a step failure to every observer.
    pub(crate) fn notify_error(&self, ctx: &WorkflowContext, step: Option<&str>, error: &str) {
        for observer in &self.observers {
            observer.handle_error(ctx, step, error);
        }
    }

    fn hook_failed(&self, ctx: &WorkflowContext, step: Option<&str>, error: &anyhow::Error) {
        warn!(workflow = ctx.id(), ?step, %error, "middleware hook failed");
        self.notify_error(ctx, step, &error.to_string());
    }
}
