use super::{from_state, to_state, AttributeAggregator};
use crate::error::{EngineError, EngineResult};
use rustc_hash::FxHashMap;
use strata_core::{AttributeType, Value};

/// Number of distinct outstanding values, reference counted so a value
/// stays counted until its last occurrence is removed
#[derive(Debug, Clone, Default)]
pub struct DistinctCountAggregator {
    occurrences: FxHashMap<Value, u64>,
}

impl DistinctCountAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Value {
        Value::Long(self.occurrences.len() as i64)
    }
}

impl AttributeAggregator for DistinctCountAggregator {
    fn name(&self) -> &'static str {
        "distinctCount"
    }

    fn return_type(&self) -> AttributeType {
        AttributeType::Long
    }

    fn process_add(&mut self, value: &Value) -> EngineResult<Value> {
        *self.occurrences.entry(value.clone()).or_insert(0) += 1;
        Ok(self.current())
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value> {
        self.check_remove(value)?;
        match self.occurrences.get_mut(value) {
            Some(count) if *count > 1 => *count -= 1,
            _ => {
                self.occurrences.remove(value);
            }
        }
        Ok(self.current())
    }

    fn check_remove(&self, value: &Value) -> EngineResult<()> {
        if !self.occurrences.contains_key(value) {
            return Err(EngineError::state_violation(
                "distinctCount",
                format!("remove of {value} which was never added"),
            ));
        }
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<Value> {
        self.occurrences.clear();
        Ok(self.current())
    }

    fn can_destroy(&self) -> bool {
        self.occurrences.is_empty()
    }

    fn current_state(&self) -> EngineResult<serde_json::Value> {
        // Keys are arbitrary values, so persist as pairs
        let pairs: Vec<(&Value, &u64)> = self.occurrences.iter().collect();
        to_state("distinctCount", &pairs)
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        let pairs: Vec<(Value, u64)> = from_state("distinctCount", state)?;
        self.occurrences = pairs.into_iter().collect();
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn AttributeAggregator> {
        Box::new(DistinctCountAggregator::new())
    }
}
