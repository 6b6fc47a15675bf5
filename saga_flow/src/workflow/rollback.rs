//! Rollback of succeeded steps using saga compensation.
//!
//! The scheduler appends an entry to the rollback log each time a step
//! succeeds through normal execution. When the workflow aborts (or a
//! caller invokes manual rollback), the log is drained in strict
//! reverse completion order, awaiting each step's undo action
//! sequentially. Undo failures are recorded and do not halt the
//! remaining undo calls; the underlying resource is presumed still
//! held. Skip- and Continue-resolved steps never enter the log: they
//! performed no real side effect through `run`.

use crate::workflow::args::StepArgs;
use crate::workflow::context::WorkflowContext;
use crate::workflow::step::{StepOutcome, Undoer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// One rollback-eligible completion.
pub(crate) struct RollbackEntry {
    pub(crate) step: String,
    pub(crate) outcome: StepOutcome,
    pub(crate) args: StepArgs,
    pub(crate) undoer: Option<Arc<dyn Undoer>>,
    pub(crate) completed_at: DateTime<Utc>,
}

/// Append-only record of steps that succeeded through normal execution.
///
/// Kept separate from the outcome map so undo order never depends on
/// map iteration order.
#[derive(Default)]
pub(crate) struct RollbackLog {
    entries: Vec<RollbackEntry>,
}

impl RollbackLog {
    /// Appends a completion. Called only by the scheduler.
    pub(crate) fn record(
        &mut self,
        step: impl Into<String>,
        outcome: StepOutcome,
        args: StepArgs,
        undoer: Option<Arc<dyn Undoer>>,
    ) {
        self.entries.push(RollbackEntry {
            step: step.into(),
            outcome,
            args,
            undoer,
            completed_at: Utc::now(),
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn drain_reversed(&mut self) -> Vec<RollbackEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.reverse();
        entries
    }
}

/// Report from one rollback pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Steps whose undo action ran successfully, in undo order
    pub undone: Vec<String>,
    /// Steps with no undo action, in undo order
    pub skipped: Vec<String>,
    /// Steps whose undo action failed, with the error message
    pub failed: Vec<(String, String)>,
}

impl RollbackReport {
    /// Returns the total number of entries processed.
    pub fn total_processed(&self) -> usize {
        self.undone.len() + self.skipped.len() + self.failed.len()
    }
}

/// Drains the log, invoking undo actions in reverse completion order.
///
/// Undo calls are awaited one at a time: later steps may depend on
/// resources created by earlier ones, so the order must be
/// deterministic and strictly reverse of completion. A failed undo is
/// recorded and the walk continues; there is no implicit retry.
pub(crate) async fn run_rollback(log: &mut RollbackLog, ctx: &Arc<WorkflowContext>) -> RollbackReport {
    let mut report = RollbackReport::default();

    for entry in log.drain_reversed() {
        let Some(undoer) = entry.undoer else {
            debug!(workflow = ctx.id(), step = %entry.step, "no undo action, skipping");
            report.skipped.push(entry.step);
            continue;
        };

        match undoer
            .undo(entry.outcome, entry.args, Arc::clone(ctx))
            .await
        {
            Ok(()) => {
                debug!(workflow = ctx.id(), step = %entry.step, "step undone");
                report.undone.push(entry.step);
            }
            Err(e) => {
                warn!(workflow = ctx.id(), step = %entry.step, error = %e, "undo failed, resource presumed held");
                report.failed.push((entry.step, e.to_string()));
            }
        }
    }

    report
}
