use super::{from_state, to_state, AttributeAggregator};
use crate::error::{EngineError, EngineResult};
use strata_core::{AttributeType, Value};

/// Number of outstanding inputs
#[derive(Debug, Default, Clone)]
pub struct CountAggregator {
    count: i64,
}

impl CountAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeAggregator for CountAggregator {
    fn name(&self) -> &'static str {
        "count"
    }

    fn return_type(&self) -> AttributeType {
        AttributeType::Long
    }

    fn process_add(&mut self, _value: &Value) -> EngineResult<Value> {
        self.count += 1;
        Ok(Value::Long(self.count))
    }

    fn process_add_many(&mut self, _values: &[Value]) -> EngineResult<Value> {
        self.process_add(&Value::Null)
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value> {
        self.check_remove(value)?;
        self.count -= 1;
        Ok(Value::Long(self.count))
    }

    fn process_remove_many(&mut self, _values: &[Value]) -> EngineResult<Value> {
        self.process_remove(&Value::Null)
    }

    fn check_remove(&self, _value: &Value) -> EngineResult<()> {
        if self.count == 0 {
            return Err(EngineError::state_violation("count", "remove without a matching add"));
        }
        Ok(())
    }

    fn check_remove_many(&self, _values: &[Value]) -> EngineResult<()> {
        self.check_remove(&Value::Null)
    }

    fn reset(&mut self) -> EngineResult<Value> {
        self.count = 0;
        Ok(Value::Long(0))
    }

    fn can_destroy(&self) -> bool {
        self.count == 0
    }

    fn current_state(&self) -> EngineResult<serde_json::Value> {
        to_state("count", &self.count)
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        self.count = from_state("count", state)?;
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn AttributeAggregator> {
        Box::new(CountAggregator::new())
    }
}
