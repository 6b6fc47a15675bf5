//! Step abstraction and handler traits for the workflow system.
//!
//! Defines the declarative step unit that workflows are built from,
//! along with the three handler seams a step may implement:
//! [`StepAction`] (the forward work), [`Compensator`] (failure
//! recovery), and [`Undoer`] (rollback of a succeeded step).

use crate::workflow::args::{ArgumentSource, StepArgs};
use crate::workflow::context::WorkflowContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Error types for step execution.
#[derive(thiserror::Error, Debug)]
pub enum StepError {
    /// Step execution failed with a message
    #[error("Step execution failed: {0}")]
    ExecutionFailed(String),

    /// Step exceeded its time limit
    #[error("Step '{step}' exceeded timeout limit of {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    /// Required argument was not resolved
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    /// I/O error during step execution
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error wrapper
    #[error("Step error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Creates an execution failure from a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Returns true if this error is a synthetic timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Verdict returned by a step's compensation handler.
///
/// Decides how the scheduler resolves a failed step:
/// - `Retry`: resubmit the step to the ready set (up to `max_retries`)
/// - `Skip`: resolve as succeeded with no data; dependents observe null
/// - `Continue`: resolve as succeeded with the provided value
/// - `Abort`: fail the workflow and trigger rollback
#[derive(Clone, Debug, PartialEq)]
pub enum CompensationVerdict {
    /// Resubmit the step unchanged, if retries remain
    Retry,
    /// Resolve the step as `{success: true, data: null}` and proceed
    Skip,
    /// Fail the workflow and roll back previously-succeeded steps
    Abort,
    /// Resolve the step as succeeded with the given value
    Continue(Value),
}

/// Resolved outcome of a single step.
///
/// Produced exactly once per step by the scheduler; read-only to
/// downstream steps and middleware afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Whether the step resolved successfully
    pub success: bool,
    /// Output value, if any (None for Skip-resolved steps)
    pub data: Option<Value>,
    /// Error message if the step failed
    pub error: Option<String>,
}

impl StepOutcome {
    /// Creates a succeeded outcome carrying the step's output.
    pub fn succeeded(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Creates a succeeded outcome with no data (Skip verdict).
    pub fn skipped() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Creates a failed outcome from an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Returns the output value, with `Null` standing in for absent data.
    pub fn value(&self) -> Value {
        self.data.clone().unwrap_or(Value::Null)
    }
}

/// Trait for the forward work of a step.
///
/// Implementations receive the step's resolved arguments and the
/// shared workflow context. Most callers use [`Step::from_fn`] or
/// [`Step::run_fn`] instead of implementing this directly.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Runs the step, producing its output value.
    async fn run(&self, args: StepArgs, ctx: Arc<WorkflowContext>) -> Result<Value, StepError>;
}

/// Trait for a step's failure-recovery handler.
///
/// Invoked by the scheduler when the step's action fails. The verdict
/// decides whether the step retries, skips forward, continues with a
/// substitute value, or aborts the workflow. A compensator that itself
/// fails is treated as an implicit `Abort`.
#[async_trait]
pub trait Compensator: Send + Sync {
    /// Decides how the failed step is resolved.
    async fn compensate(
        &self,
        error: StepError,
        args: StepArgs,
        ctx: Arc<WorkflowContext>,
    ) -> Result<CompensationVerdict, StepError>;
}

/// Trait for a step's rollback action.
///
/// Invoked by the rollback manager, in strict reverse completion
/// order, for steps that succeeded through normal execution before the
/// workflow aborted. Side-effect only; failures are recorded but do
/// not halt the remaining rollback.
#[async_trait]
pub trait Undoer: Send + Sync {
    /// Undoes the side effects of a succeeded step.
    async fn undo(
        &self,
        outcome: StepOutcome,
        args: StepArgs,
        ctx: Arc<WorkflowContext>,
    ) -> Result<(), StepError>;
}

/// Adapter implementing [`StepAction`] for async closures.
struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    async fn run(&self, args: StepArgs, ctx: Arc<WorkflowContext>) -> Result<Value, StepError> {
        (self.0)(args, ctx).await
    }
}

/// Adapter implementing [`Compensator`] for async closures.
struct FnCompensator<F>(F);

#[async_trait]
impl<F, Fut> Compensator for FnCompensator<F>
where
    F: Fn(StepError, StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CompensationVerdict, StepError>> + Send,
{
    async fn compensate(
        &self,
        error: StepError,
        args: StepArgs,
        ctx: Arc<WorkflowContext>,
    ) -> Result<CompensationVerdict, StepError> {
        (self.0)(error, args, ctx).await
    }
}

/// Adapter implementing [`Undoer`] for async closures.
struct FnUndoer<F>(F);

#[async_trait]
impl<F, Fut> Undoer for FnUndoer<F>
where
    F: Fn(StepOutcome, StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send,
{
    async fn undo(
        &self,
        outcome: StepOutcome,
        args: StepArgs,
        ctx: Arc<WorkflowContext>,
    ) -> Result<(), StepError> {
        (self.0)(outcome, args, ctx).await
    }
}

/// A named unit of work with explicit dependencies and argument bindings.
///
/// Steps are declared through the fluent setters and handed to
/// [`WorkflowBuilder::step`](crate::workflow::builder::WorkflowBuilder::step).
/// The definition is immutable once the workflow is built.
///
/// # Example
///
/// ```ignore
/// let step = Step::from_fn("reserve", |args, _ctx| async move {
///     Ok(serde_json::json!({ "reservation": args.require("order")? }))
/// })
/// .arg("order", ArgumentSource::FromInput("order_id".into()))
/// .undo_fn(|_outcome, _args, _ctx| async move { Ok(()) })
/// .with_max_retries(2);
/// ```
#[derive(Clone)]
pub struct Step {
    pub(crate) name: String,
    pub(crate) dependencies: Vec<String>,
    pub(crate) arguments: Vec<(String, ArgumentSource)>,
    pub(crate) action: Arc<dyn StepAction>,
    pub(crate) compensator: Option<Arc<dyn Compensator>>,
    pub(crate) undoer: Option<Arc<dyn Undoer>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_retries: u32,
}

impl Step {
    /// Creates a step from a name and an action implementation.
    pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            arguments: Vec::new(),
            action: Arc::new(action),
            compensator: None,
            undoer: None,
            timeout: None,
            max_retries: 0,
        }
    }

    /// Creates a step from a name and an async closure.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let step = Step::from_fn("fetch", |_args, _ctx| async move {
    ///     Ok(serde_json::json!(42))
    /// });
    /// ```
    pub fn from_fn<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self::new(name, FnAction(run))
    }

    /// Replaces the step's action with an async closure.
    pub fn run_fn<F, Fut>(mut self, run: F) -> Self
    where
        F: Fn(StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.action = Arc::new(FnAction(run));
        self
    }

    /// Declares a dependency on another step by name.
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    /// Binds an argument to a source resolved at launch time.
    ///
    /// A `FromStep` source implicitly adds the referenced step to this
    /// step's dependencies when the workflow is built.
    pub fn arg(mut self, name: impl Into<String>, source: ArgumentSource) -> Self {
        self.arguments.push((name.into(), source));
        self
    }

    /// Sets the compensation handler.
    pub fn with_compensator(mut self, compensator: impl Compensator + 'static) -> Self {
        self.compensator = Some(Arc::new(compensator));
        self
    }

    /// Sets the compensation handler from an async closure.
    pub fn compensate_fn<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(StepError, StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CompensationVerdict, StepError>> + Send + 'static,
    {
        self.compensator = Some(Arc::new(FnCompensator(compensate)));
        self
    }

    /// Sets the undo handler.
    pub fn with_undoer(mut self, undoer: impl Undoer + 'static) -> Self {
        self.undoer = Some(Arc::new(undoer));
        self
    }

    /// Sets the undo handler from an async closure.
    pub fn undo_fn<F, Fut>(mut self, undo: F) -> Self
    where
        F: Fn(StepOutcome, StepArgs, Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.undoer = Some(Arc::new(FnUndoer(undo)));
        self
    }

    /// Sets the per-step timeout. Expiry is a normal step failure,
    /// subject to this step's compensation handler.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of `Retry` verdicts honored for this
    /// step before retries are exhausted (default 0).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared dependencies.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns true if the step declares a compensation handler.
    pub fn has_compensator(&self) -> bool {
        self.compensator.is_some()
    }

    /// Returns true if the step declares an undo handler.
    pub fn has_undoer(&self) -> bool {
        self.undoer.is_some()
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("arguments", &self.arguments)
            .field("compensator", &self.compensator.is_some())
            .field("undoer", &self.undoer.is_some())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
