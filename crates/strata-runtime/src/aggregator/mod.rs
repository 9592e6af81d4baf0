//! Incremental attribute aggregators
//!
//! Aggregators keep a running value that is updated by adding and removing
//! inputs rather than recomputed over a window. Every call returns the value
//! after the mutation. Windows drive them with `Current` (add), `Expired`
//! (remove) and `Reset` records.
//!
//! # Available Aggregators
//!
//! | Name | Input | Output | Empty value |
//! |------|-------|--------|-------------|
//! | `count` | any / none | long | `0` |
//! | `sum` | int, long, float, double | long or double | null |
//! | `avg` | numeric | double | null |
//! | `distinctCount` | any | long | `0` |
//! | `and` | bool | bool | `false` |
//! | `unionSet` | set | set | empty set |
//!
//! Input kinds are resolved once by [`create_aggregator`]; a mismatch is a
//! validation error at query construction, never a per-event coercion.
//! Removing a value that was never added is a
//! [`StateViolation`](crate::error::EngineError::StateViolation): it signals
//! broken windowing upstream, not bad input.

mod and;
mod avg;
mod count;
mod distinct_count;
mod sum;
mod union_set;

pub use and::AndAggregator;
pub use avg::AvgAggregator;
pub use count::CountAggregator;
pub use distinct_count::DistinctCountAggregator;
pub use sum::SumAggregator;
pub use union_set::UnionSetAggregator;

use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind};
use crate::executor::ExpressionExecutor;
use strata_core::{AttributeType, Value};

/// How the enclosing window feeds the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Whole batches are added then reset
    #[default]
    Batch,
    /// Individual events are added and later removed
    Slide,
}

/// Construction-time facts an aggregator may specialize on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregatorSettings {
    pub mode: ProcessingMode,
    pub output_expects_expired: bool,
}

impl AggregatorSettings {
    /// Whether inputs may later be removed.
    pub fn tracks_removals(&self) -> bool {
        self.mode == ProcessingMode::Slide || self.output_expects_expired
    }
}

/// A running aggregate
pub trait AttributeAggregator: Send {
    fn name(&self) -> &'static str;

    fn return_type(&self) -> AttributeType;

    fn process_add(&mut self, value: &Value) -> EngineResult<Value>;

    /// Add several arguments at once, for aggregators taking more than one.
    fn process_add_many(&mut self, _values: &[Value]) -> EngineResult<Value> {
        Err(EngineError::illegal_state(format!(
            "{} cannot process an argument array",
            self.name()
        )))
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value>;

    fn process_remove_many(&mut self, _values: &[Value]) -> EngineResult<Value> {
        Err(EngineError::illegal_state(format!(
            "{} cannot process an argument array",
            self.name()
        )))
    }

    /// The error `process_remove` would return for `value`, without
    /// touching the accumulator.
    fn check_remove(&self, _value: &Value) -> EngineResult<()> {
        Ok(())
    }

    fn check_remove_many(&self, _values: &[Value]) -> EngineResult<()> {
        Ok(())
    }

    /// Return to the empty state, yielding the empty value.
    fn reset(&mut self) -> EngineResult<Value>;

    /// True once the accumulator is back to its identity state.
    fn can_destroy(&self) -> bool;

    fn current_state(&self) -> EngineResult<serde_json::Value>;

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()>;

    /// Fresh aggregator with the same configuration and empty state.
    fn clone_empty(&self) -> Box<dyn AttributeAggregator>;
}

/// Build the aggregator `name` for the given argument types.
pub fn create_aggregator(
    name: &str,
    input_types: &[AttributeType],
    settings: AggregatorSettings,
) -> EngineResult<Box<dyn AttributeAggregator>> {
    let single = || match input_types {
        [ty] => Ok(*ty),
        _ => Err(EngineError::validation(
            "aggregator",
            format!("{name} expects 1 argument, found {}", input_types.len()),
        )),
    };
    let aggregator: Box<dyn AttributeAggregator> = match name {
        "count" => {
            if input_types.len() > 1 {
                return Err(EngineError::validation(
                    "aggregator",
                    format!("count expects at most 1 argument, found {}", input_types.len()),
                ));
            }
            Box::new(CountAggregator::new())
        }
        "sum" => Box::new(SumAggregator::new(single()?)?),
        "avg" => Box::new(AvgAggregator::new(single()?)?),
        "distinctCount" => {
            single()?;
            Box::new(DistinctCountAggregator::new())
        }
        "and" => Box::new(AndAggregator::new(single()?)?),
        "unionSet" => Box::new(UnionSetAggregator::new(single()?, settings)?),
        other => {
            return Err(EngineError::validation(
                "aggregator",
                format!("unknown aggregator '{other}'"),
            ))
        }
    };
    Ok(aggregator)
}

/// Serialize an aggregator's accumulator.
pub(crate) fn to_state<T: serde::Serialize>(name: &'static str, state: &T) -> EngineResult<serde_json::Value> {
    serde_json::to_value(state).map_err(|e| EngineError::snapshot(name, e.to_string()))
}

pub(crate) fn from_state<T: serde::de::DeserializeOwned>(name: &'static str, state: &serde_json::Value) -> EngineResult<T> {
    T::deserialize(state).map_err(|e| EngineError::snapshot(name, e.to_string()))
}

pub(crate) fn type_mismatch(component: &'static str, expected: AttributeType, found: &Value) -> EngineError {
    EngineError::TypeMismatch {
        component,
        expected,
        found: found.type_name().to_string(),
    }
}

/// Binds an aggregator to its argument expressions and dispatches records
/// by kind: `Current` adds, `Expired` removes, `Reset` resets.
pub struct AttributeAggregatorExecutor {
    aggregator: Box<dyn AttributeAggregator>,
    args: Vec<ExpressionExecutor>,
}

impl AttributeAggregatorExecutor {
    pub fn new(
        name: &str,
        args: Vec<ExpressionExecutor>,
        settings: AggregatorSettings,
    ) -> EngineResult<Self> {
        let types: Vec<AttributeType> = args.iter().map(ExpressionExecutor::return_type).collect();
        let aggregator = create_aggregator(name, &types, settings)?;
        Ok(Self { aggregator, args })
    }

    pub fn return_type(&self) -> AttributeType {
        self.aggregator.return_type()
    }

    pub fn execute(&mut self, event: &ComplexEvent) -> EngineResult<Value> {
        match event.kind() {
            EventKind::Current => match self.args.as_slice() {
                [] => self.aggregator.process_add(&Value::Null),
                [arg] => self.aggregator.process_add(&arg.execute(event)),
                args => {
                    let values: Vec<Value> = args.iter().map(|a| a.execute(event)).collect();
                    self.aggregator.process_add_many(&values)
                }
            },
            EventKind::Expired => match self.args.as_slice() {
                [] => self.aggregator.process_remove(&Value::Null),
                [arg] => self.aggregator.process_remove(&arg.execute(event)),
                args => {
                    let values: Vec<Value> = args.iter().map(|a| a.execute(event)).collect();
                    self.aggregator.process_remove_many(&values)
                }
            },
            EventKind::Reset => self.aggregator.reset(),
            EventKind::Timer => Err(EngineError::illegal_state(
                "timer records must not reach an aggregator",
            )),
        }
    }

    /// Fails when `event` could not be applied. Nothing is mutated, so
    /// callers can vet a record against several executors first.
    pub fn check(&self, event: &ComplexEvent) -> EngineResult<()> {
        if event.kind() != EventKind::Expired {
            return Ok(());
        }
        match self.args.as_slice() {
            [] => self.aggregator.check_remove(&Value::Null),
            [arg] => self.aggregator.check_remove(&arg.execute(event)),
            args => {
                let values: Vec<Value> = args.iter().map(|a| a.execute(event)).collect();
                self.aggregator.check_remove_many(&values)
            }
        }
    }

    pub fn can_destroy(&self) -> bool {
        self.aggregator.can_destroy()
    }

    pub fn current_state(&self) -> EngineResult<serde_json::Value> {
        self.aggregator.current_state()
    }

    pub fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        self.aggregator.restore_state(state)
    }

    /// Same configuration with an empty accumulator.
    pub fn clone_empty(&self) -> Self {
        Self {
            aggregator: self.aggregator.clone_empty(),
            args: self.args.clone(),
        }
    }
}
