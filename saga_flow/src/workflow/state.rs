//! Workflow run state and result types.
//!
//! The result is the sole value returned from `execute`: step-level
//! failures never escape as errors, they surface here through `state`
//! and the ordered `errors` list.

use crate::workflow::step::StepOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle state of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Run has not started
    Pending,
    /// Steps are being scheduled
    Executing,
    /// Every step resolved successfully
    Completed,
    /// The run aborted, timed out, or was cancelled
    Failed,
    /// Undo actions were applied through an explicit rollback call
    RolledBack,
}

/// One recorded error, in the order it occurred.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowErrorRecord {
    /// Step the error belongs to, if any
    pub step: Option<String>,
    /// Human-readable error message
    pub message: String,
}

impl WorkflowErrorRecord {
    pub(crate) fn for_step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            message: message.into(),
        }
    }

    pub(crate) fn workflow(message: impl Into<String>) -> Self {
        Self {
            step: None,
            message: message.into(),
        }
    }
}

/// Final result of one `execute` call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow run id
    pub id: String,
    /// Final run state
    pub state: WorkflowState,
    /// Resolved outcome per step name
    pub outcomes: HashMap<String, StepOutcome>,
    /// Errors in occurrence order (unrecovered failures only)
    pub errors: Vec<WorkflowErrorRecord>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
    /// Output of the designated return step, if one was set
    pub return_value: Option<Value>,
}

impl WorkflowResult {
    /// Returns true if the run completed with every step resolved.
    pub fn succeeded(&self) -> bool {
        self.state == WorkflowState::Completed
    }
}
