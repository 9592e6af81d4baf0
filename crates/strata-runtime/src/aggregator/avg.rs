use super::{from_state, to_state, type_mismatch, AttributeAggregator};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use strata_core::{AttributeType, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AvgState {
    sum: f64,
    count: u64,
}

/// Running mean of a numeric input, as a double
#[derive(Debug, Clone)]
pub struct AvgAggregator {
    input: AttributeType,
    state: AvgState,
}

impl AvgAggregator {
    pub fn new(input: AttributeType) -> EngineResult<Self> {
        if !input.is_numeric() {
            return Err(EngineError::validation(
                "avg aggregator",
                format!("avg requires a numeric argument, found {input}"),
            ));
        }
        Ok(Self {
            input,
            state: AvgState::default(),
        })
    }

    fn numeric(&self, value: &Value) -> EngineResult<f64> {
        if value.attribute_type() != Some(self.input) {
            return Err(type_mismatch("avg aggregator", self.input, value));
        }
        value
            .as_f64()
            .ok_or_else(|| type_mismatch("avg aggregator", self.input, value))
    }

    fn current(&self) -> Value {
        if self.state.count == 0 {
            Value::Null
        } else {
            Value::Double(self.state.sum / self.state.count as f64)
        }
    }
}

impl AttributeAggregator for AvgAggregator {
    fn name(&self) -> &'static str {
        "avg"
    }

    fn return_type(&self) -> AttributeType {
        AttributeType::Double
    }

    fn process_add(&mut self, value: &Value) -> EngineResult<Value> {
        if value.is_null() {
            return Ok(self.current());
        }
        self.state.sum += self.numeric(value)?;
        self.state.count += 1;
        Ok(self.current())
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value> {
        if value.is_null() {
            return Ok(self.current());
        }
        self.check_remove(value)?;
        self.state.sum -= self.numeric(value)?;
        self.state.count -= 1;
        if self.state.count == 0 {
            self.state.sum = 0.0;
        }
        Ok(self.current())
    }

    fn check_remove(&self, value: &Value) -> EngineResult<()> {
        if value.is_null() {
            return Ok(());
        }
        if self.state.count == 0 {
            return Err(EngineError::state_violation("avg", "remove without a matching add"));
        }
        self.numeric(value).map(|_| ())
    }

    fn reset(&mut self) -> EngineResult<Value> {
        self.state = AvgState::default();
        Ok(Value::Null)
    }

    fn can_destroy(&self) -> bool {
        self.state.count == 0
    }

    fn current_state(&self) -> EngineResult<serde_json::Value> {
        to_state("avg", &self.state)
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        self.state = from_state("avg", state)?;
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn AttributeAggregator> {
        Box::new(AvgAggregator {
            input: self.input,
            state: AvgState::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_tracks_adds_and_removes() {
        let mut a = AvgAggregator::new(AttributeType::Int).unwrap();
        a.process_add(&Value::Int(2)).unwrap();
        assert_eq!(a.process_add(&Value::Int(4)).unwrap(), Value::Double(3.0));
        assert_eq!(a.process_remove(&Value::Int(2)).unwrap(), Value::Double(4.0));
        assert_eq!(a.process_remove(&Value::Int(4)).unwrap(), Value::Null);
        assert!(a.can_destroy());
    }

    #[test]
    fn test_rejects_wrong_kinds() {
        assert!(AvgAggregator::new(AttributeType::String).is_err());
        let mut a = AvgAggregator::new(AttributeType::Long).unwrap();
        assert!(a.process_add(&Value::Int(1)).is_err());
    }
}
