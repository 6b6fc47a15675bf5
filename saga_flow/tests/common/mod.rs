//! Common test utilities for workflow integration tests.

use saga_flow::{Middleware, StepOutcome, WorkflowContext, WorkflowResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Builds an input payload from key/value pairs.
pub fn input_map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Middleware that records every lifecycle event in order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Middleware for Recorder {
    fn before_workflow(&self, _ctx: &WorkflowContext) -> anyhow::Result<()> {
        self.push("before_workflow".to_string());
        Ok(())
    }

    fn before_step(&self, _ctx: &WorkflowContext, step: &str) -> anyhow::Result<()> {
        self.push(format!("before_step:{step}"));
        Ok(())
    }

    fn after_step(
        &self,
        _ctx: &WorkflowContext,
        step: &str,
        outcome: &StepOutcome,
    ) -> anyhow::Result<()> {
        self.push(format!("after_step:{step}:{}", outcome.success));
        Ok(())
    }

    fn after_workflow(&self, _ctx: &WorkflowContext, result: &WorkflowResult) -> anyhow::Result<()> {
        self.push(format!("after_workflow:{:?}", result.state));
        Ok(())
    }

    fn handle_error(&self, _ctx: &WorkflowContext, step: Option<&str>, _error: &str) {
        self.push(format!("error:{}", step.unwrap_or("<workflow>")));
    }
}
