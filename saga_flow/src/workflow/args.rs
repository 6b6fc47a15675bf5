//! Argument sources and resolution.
//!
//! Each step declares where its arguments come from: the workflow's
//! initial input payload, another step's resolved output, or a fixed
//! literal. Resolution is pure and synchronous; the scheduler only
//! resolves arguments once every referenced step has a resolved
//! outcome, so resolution never blocks.

use crate::workflow::step::{Step, StepOutcome};
use serde_json::Value;
use std::collections::HashMap;

/// Source of a single step argument.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgumentSource {
    /// Read the named field from the workflow's input payload
    FromInput(String),
    /// Read the named step's output data (null if Skip-resolved)
    FromStep(String),
    /// A fixed value
    Literal(Value),
}

/// Arguments resolved for one step invocation.
#[derive(Clone, Debug, Default)]
pub struct StepArgs {
    values: HashMap<String, Value>,
}

impl StepArgs {
    /// Returns the argument value, if bound.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns the argument value or a `MissingArgument` error.
    pub fn require(&self, name: &str) -> Result<&Value, crate::workflow::step::StepError> {
        self.values
            .get(name)
            .ok_or_else(|| crate::workflow::step::StepError::MissingArgument(name.to_string()))
    }

    /// Inserts an argument binding.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Returns the number of bound arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no arguments are bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolves a step's declared argument sources to concrete values.
///
/// `FromInput` reads the (default-applied) input payload, `FromStep`
/// reads the outcome map's data field, and `Literal` copies the fixed
/// value. Unknown input names and Skip-resolved dependencies both
/// resolve to `Null`.
pub(crate) fn resolve_arguments(
    step: &Step,
    inputs: &HashMap<String, Value>,
    outcomes: &HashMap<String, StepOutcome>,
) -> StepArgs {
    let mut args = StepArgs::default();
    for (name, source) in &step.arguments {
        let value = match source {
            ArgumentSource::FromInput(input) => {
                inputs.get(input).cloned().unwrap_or(Value::Null)
            }
            ArgumentSource::FromStep(dep) => outcomes
                .get(dep)
                .map(StepOutcome::value)
                .unwrap_or(Value::Null),
            ArgumentSource::Literal(value) => value.clone(),
        };
        args.insert(name.clone(), value);
    }
    args
}
