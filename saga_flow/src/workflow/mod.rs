//! Saga-style workflow orchestration.
//!
//! The workflow module provides a DAG-based step scheduler that:
//! - Executes steps concurrently, respecting declared dependencies
//! - Validates the definition for cycles, duplicates and missing
//!   references before anything runs
//! - Recovers from step failures through per-step compensation
//!   handlers (retry, skip, continue with a substitute value, abort)
//! - Rolls back succeeded steps in reverse completion order when a
//!   run aborts
//!
//! # Architecture
//!
//! The system is built around four core components:
//! - [`Step`](crate::workflow::step::Step): a named unit of work with
//!   dependencies, argument bindings, and optional compensation and
//!   undo handlers
//! - [`WorkflowBuilder`](crate::workflow::builder::WorkflowBuilder):
//!   fluent construction and whole-definition validation
//! - `scheduler`: bounded concurrent graph drain and the compensation
//!   state machine (crate-internal)
//! - [`RollbackReport`](crate::workflow::rollback::RollbackReport):
//!   the record of one backward-recovery pass
//!
//! # Example
//!
//! ```ignore
//! use saga_flow::workflow::{ArgumentSource, Step, WorkflowBuilder};
//!
//! let reserve = Step::from_fn("reserve", |args, _ctx| async move {
//!     Ok(serde_json::json!({ "reservation": args.require("order")? }))
//! })
//! .arg("order", ArgumentSource::FromInput("order_id".into()))
//! .undo_fn(|_outcome, _args, _ctx| async move { Ok(()) });
//!
//! let workflow = WorkflowBuilder::new("provision")
//!     .step(reserve)
//!     .returns("reserve")
//!     .build()?;
//!
//! let result = workflow.execute(inputs).await?;
//! ```
//!
//! # Execution Model
//!
//! 1. Validate the definition (builder time)
//! 2. Validate required inputs and apply defaults
//! 3. Drain the graph: launch ready steps up to the concurrency bound,
//!    resolve outcomes, unlock dependents
//! 4. On failure, consult the step's compensation handler
//! 5. On abort, undo succeeded steps in reverse completion order

pub mod args;
pub mod builder;
pub mod cancellation;
pub mod context;
pub mod dag;
pub mod middleware;
pub mod rollback;
pub mod state;
pub mod step;

pub(crate) mod scheduler;

// Re-export core types for public API
pub use args::{ArgumentSource, StepArgs};
pub use builder::{InputSpec, Workflow, WorkflowBuilder, WorkflowConfig};
pub use cancellation::{CancellationToken, CancellationTokenSource};
pub use context::WorkflowContext;
pub use dag::ConstructionError;
pub use middleware::Middleware;
pub use rollback::RollbackReport;
pub use state::{WorkflowErrorRecord, WorkflowResult, WorkflowState};
pub use step::{
    CompensationVerdict, Compensator, Step, StepAction, StepError, StepOutcome, Undoer,
};
