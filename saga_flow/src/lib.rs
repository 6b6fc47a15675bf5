//! Saga-style workflow executor for dependent async steps.
//!
//! This crate runs named steps across a dependency graph with bounded
//! concurrency, recovering from failures through per-step compensation
//! and undoing completed work in reverse order when a run aborts:
//!
//! - Declaration: steps, argument bindings, inputs, middleware
//! - Validation: cycles, duplicates and dangling references rejected
//!   before execution
//! - Scheduling: ready steps run concurrently up to a configured bound
//! - Compensation: failed steps retry, skip, continue with a
//!   substitute value, or abort the run
//! - Rollback: succeeded steps are undone in strict reverse
//!   completion order
//!
//! # Example
//!
//! ```ignore
//! use saga_flow::{ArgumentSource, InputSpec, Step, WorkflowBuilder};
//! use std::collections::HashMap;
//!
//! let workflow = WorkflowBuilder::new("checkout")
//!     .input(InputSpec::required("order_id"))
//!     .step(
//!         Step::from_fn("charge", |args, _ctx| async move {
//!             Ok(serde_json::json!({ "charged": args.require("order")? }))
//!         })
//!         .arg("order", ArgumentSource::FromInput("order_id".into()))
//!         .undo_fn(|_outcome, _args, _ctx| async move { Ok(()) }),
//!     )
//!     .returns("charge")
//!     .build()?;
//!
//! let inputs = HashMap::from([("order_id".to_string(), serde_json::json!("ord-7"))]);
//! let result = workflow.execute(inputs).await?;
//! assert!(result.succeeded());
//! ```

pub mod workflow;

pub use workflow::{
    ArgumentSource, CancellationToken, CancellationTokenSource, CompensationVerdict, Compensator,
    ConstructionError, InputSpec, Middleware, RollbackReport, Step, StepAction, StepArgs,
    StepError, StepOutcome, Undoer, Workflow, WorkflowBuilder, WorkflowConfig, WorkflowContext,
    WorkflowErrorRecord, WorkflowResult, WorkflowState,
};
