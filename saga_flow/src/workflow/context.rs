//! Per-execution workflow context.
//!
//! One context is created for each `execute` call and shared with
//! every handler invocation during that call. It carries identity,
//! a metadata map that only middleware should mutate, and a read-only
//! view over resolved step outcomes.

use crate::workflow::step::StepOutcome;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Execution context shared across one workflow run.
///
/// The outcome view is written only by the scheduler; steps and
/// middleware read it through [`outcome`](Self::outcome). Metadata is
/// a free-form map intended for middleware (correlation ids, timing
/// marks); step data flows through arguments, never through here.
pub struct WorkflowContext {
    id: String,
    trace_id: String,
    started_at: DateTime<Utc>,
    metadata: Mutex<HashMap<String, Value>>,
    outcomes: RwLock<HashMap<String, StepOutcome>>,
}

impl WorkflowContext {
    /// Creates a fresh context with generated workflow and trace ids.
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            metadata: Mutex::new(HashMap::new()),
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the workflow run id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the trace/correlation id for this run.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Returns when this run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stores a metadata value. Intended for middleware.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata
            .lock()
            .expect("metadata lock poisoned")
            .insert(key.into(), value);
    }

    /// Reads a metadata value.
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata
            .lock()
            .expect("metadata lock poisoned")
            .get(key)
            .cloned()
    }

    /// Returns the resolved outcome of a step, if it has one yet.
    pub fn outcome(&self, step: &str) -> Option<StepOutcome> {
        self.outcomes
            .read()
            .expect("outcome lock poisoned")
            .get(step)
            .cloned()
    }

    /// Records a resolved outcome. Scheduler-only.
    pub(crate) fn record_outcome(&self, step: impl Into<String>, outcome: StepOutcome) {
        self.outcomes
            .write()
            .expect("outcome lock poisoned")
            .insert(step.into(), outcome);
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("id", &self.id)
            .field("trace_id", &self.trace_id)
            .field("started_at", &self.started_at)
            .finish()
    }
}
