use super::{from_state, to_state, type_mismatch, AggregatorSettings, AttributeAggregator};
use crate::error::{EngineError, EngineResult};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strata_core::{AttributeType, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UnionState {
    union: BTreeSet<Value>,
    /// Per-element contributor counts; present only when inputs can be removed
    counts: Option<Vec<(Value, u64)>>,
}

/// Union of input sets.
///
/// Every call returns a fresh copy of the union since earlier results may be
/// held downstream. When inputs can be removed, each element is reference
/// counted so removing one contributing set keeps elements another set
/// still covers.
#[derive(Debug, Clone)]
pub struct UnionSetAggregator {
    union: BTreeSet<Value>,
    counts: Option<FxHashMap<Value, u64>>,
}

impl UnionSetAggregator {
    pub fn new(input: AttributeType, settings: AggregatorSettings) -> EngineResult<Self> {
        if input != AttributeType::Object {
            return Err(EngineError::validation(
                "unionSet aggregator",
                format!("unionSet requires a set argument, found {input}"),
            ));
        }
        Ok(Self {
            union: BTreeSet::new(),
            counts: settings.tracks_removals().then(FxHashMap::default),
        })
    }

    fn current(&self) -> Value {
        Value::Set(self.union.clone())
    }

    fn input_set<'a>(value: &'a Value) -> EngineResult<Option<&'a BTreeSet<Value>>> {
        match value {
            Value::Set(set) => Ok(Some(set)),
            Value::Null => Ok(None),
            other => Err(type_mismatch("unionSet aggregator", AttributeType::Object, other)),
        }
    }
}

impl AttributeAggregator for UnionSetAggregator {
    fn name(&self) -> &'static str {
        "unionSet"
    }

    fn return_type(&self) -> AttributeType {
        AttributeType::Object
    }

    fn process_add(&mut self, value: &Value) -> EngineResult<Value> {
        if let Some(set) = Self::input_set(value)? {
            for element in set {
                self.union.insert(element.clone());
                if let Some(counts) = self.counts.as_mut() {
                    *counts.entry(element.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(self.current())
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value> {
        self.check_remove(value)?;
        if let (Some(set), Some(counts)) = (Self::input_set(value)?, self.counts.as_mut()) {
            for element in set {
                match counts.get_mut(element) {
                    Some(count) if *count > 1 => *count -= 1,
                    _ => {
                        counts.remove(element);
                        self.union.remove(element);
                    }
                }
            }
        }
        Ok(self.current())
    }

    fn check_remove(&self, value: &Value) -> EngineResult<()> {
        let Some(set) = Self::input_set(value)? else {
            return Ok(());
        };
        let counts = self.counts.as_ref().ok_or_else(|| {
            EngineError::illegal_state(
                "unionSet configured without removals received an expired input",
            )
        })?;
        if let Some(missing) = set.iter().find(|element| !counts.contains_key(*element)) {
            return Err(EngineError::state_violation(
                "unionSet",
                format!("remove of {missing} which is not in the union"),
            ));
        }
        Ok(())
    }

    /// Clears the counts only when they are kept.
    fn reset(&mut self) -> EngineResult<Value> {
        self.union.clear();
        if let Some(counts) = self.counts.as_mut() {
            counts.clear();
        }
        Ok(self.current())
    }

    fn can_destroy(&self) -> bool {
        self.union.is_empty() && self.counts.as_ref().map_or(true, FxHashMap::is_empty)
    }

    fn current_state(&self) -> EngineResult<serde_json::Value> {
        let state = UnionState {
            union: self.union.clone(),
            counts: self
                .counts
                .as_ref()
                .map(|c| c.iter().map(|(k, v)| (k.clone(), *v)).collect()),
        };
        to_state("unionSet", &state)
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        let restored: UnionState = from_state("unionSet", state)?;
        self.union = restored.union;
        self.counts = match (restored.counts, self.counts.is_some()) {
            (Some(pairs), _) => Some(pairs.into_iter().collect()),
            (None, true) => Some(FxHashMap::default()),
            (None, false) => None,
        };
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn AttributeAggregator> {
        Box::new(UnionSetAggregator {
            union: BTreeSet::new(),
            counts: self.counts.as_ref().map(|_| FxHashMap::default()),
        })
    }
}
