use super::{from_state, to_state, type_mismatch, AttributeAggregator};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use strata_core::{AttributeType, Value};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct AndState {
    true_count: u64,
    false_count: u64,
}

/// Logical AND over outstanding inputs: true iff at least one true and no
/// false input is outstanding
#[derive(Debug, Clone, Default)]
pub struct AndAggregator {
    state: AndState,
}

impl AndAggregator {
    pub fn new(input: AttributeType) -> EngineResult<Self> {
        if input != AttributeType::Bool {
            return Err(EngineError::validation(
                "and aggregator",
                format!("and requires a bool argument, found {input}"),
            ));
        }
        Ok(Self::default())
    }

    fn current(&self) -> Value {
        Value::Bool(self.state.true_count > 0 && self.state.false_count == 0)
    }
}

impl AttributeAggregator for AndAggregator {
    fn name(&self) -> &'static str {
        "and"
    }

    fn return_type(&self) -> AttributeType {
        AttributeType::Bool
    }

    fn process_add(&mut self, value: &Value) -> EngineResult<Value> {
        match value {
            Value::Bool(true) => self.state.true_count += 1,
            Value::Bool(false) => self.state.false_count += 1,
            Value::Null => {}
            other => return Err(type_mismatch("and aggregator", AttributeType::Bool, other)),
        }
        Ok(self.current())
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value> {
        self.check_remove(value)?;
        match value {
            Value::Bool(true) => self.state.true_count -= 1,
            Value::Bool(false) => self.state.false_count -= 1,
            _ => {}
        }
        Ok(self.current())
    }

    fn check_remove(&self, value: &Value) -> EngineResult<()> {
        let counter = match value {
            Value::Bool(true) => self.state.true_count,
            Value::Bool(false) => self.state.false_count,
            Value::Null => return Ok(()),
            other => return Err(type_mismatch("and aggregator", AttributeType::Bool, other)),
        };
        if counter == 0 {
            return Err(EngineError::state_violation(
                "and",
                format!("remove of {value} which was never added"),
            ));
        }
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<Value> {
        self.state = AndState::default();
        Ok(Value::Bool(false))
    }

    fn can_destroy(&self) -> bool {
        self.state.true_count == 0 && self.state.false_count == 0
    }

    fn current_state(&self) -> EngineResult<serde_json::Value> {
        to_state("and", &self.state)
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        self.state = from_state("and", state)?;
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn AttributeAggregator> {
        Box::new(AndAggregator::default())
    }
}
