use super::{from_state, to_state, type_mismatch, AttributeAggregator};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use strata_core::{AttributeType, Value};

/// Accumulator specialized on the declared input kind. Integral inputs sum
/// into a long, floating inputs into a double.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Accumulator {
    Int(i64),
    Long(i64),
    Float(f64),
    Double(f64),
}

impl Accumulator {
    fn for_type(ty: AttributeType) -> EngineResult<Self> {
        match ty {
            AttributeType::Int => Ok(Accumulator::Int(0)),
            AttributeType::Long => Ok(Accumulator::Long(0)),
            AttributeType::Float => Ok(Accumulator::Float(0.0)),
            AttributeType::Double => Ok(Accumulator::Double(0.0)),
            other => Err(EngineError::validation(
                "sum aggregator",
                format!("sum requires a numeric argument, found {other}"),
            )),
        }
    }

    fn input_type(&self) -> AttributeType {
        match self {
            Accumulator::Int(_) => AttributeType::Int,
            Accumulator::Long(_) => AttributeType::Long,
            Accumulator::Float(_) => AttributeType::Float,
            Accumulator::Double(_) => AttributeType::Double,
        }
    }

    fn zeroed(&self) -> Self {
        match self {
            Accumulator::Int(_) => Accumulator::Int(0),
            Accumulator::Long(_) => Accumulator::Long(0),
            Accumulator::Float(_) => Accumulator::Float(0.0),
            Accumulator::Double(_) => Accumulator::Double(0.0),
        }
    }

    fn is_zero(&self) -> bool {
        match self {
            Accumulator::Int(s) | Accumulator::Long(s) => *s == 0,
            Accumulator::Float(s) | Accumulator::Double(s) => *s == 0.0,
        }
    }

    /// Apply `value` with `sign` (+1 add, -1 remove).
    fn apply(&mut self, value: &Value, sign: i8) -> EngineResult<()> {
        match (self, value) {
            (Accumulator::Int(s), Value::Int(v)) => *s = wrapping(*s, i64::from(*v), sign),
            (Accumulator::Long(s), Value::Long(v)) => *s = wrapping(*s, *v, sign),
            (Accumulator::Float(s), Value::Float(v)) => *s += f64::from(sign) * f64::from(*v),
            (Accumulator::Double(s), Value::Double(v)) => *s += f64::from(sign) * *v,
            (acc, other) => return Err(type_mismatch("sum aggregator", acc.input_type(), other)),
        }
        Ok(())
    }

    fn value(&self) -> Value {
        match self {
            Accumulator::Int(s) | Accumulator::Long(s) => Value::Long(*s),
            Accumulator::Float(s) | Accumulator::Double(s) => Value::Double(*s),
        }
    }
}

fn wrapping(sum: i64, v: i64, sign: i8) -> i64 {
    if sign >= 0 {
        sum.wrapping_add(v)
    } else {
        sum.wrapping_sub(v)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SumState {
    sum: Accumulator,
    count: u64,
}

/// Running sum. Yields null, not zero, once no inputs are outstanding.
#[derive(Debug, Clone)]
pub struct SumAggregator {
    state: SumState,
}

impl SumAggregator {
    pub fn new(input: AttributeType) -> EngineResult<Self> {
        Ok(Self {
            state: SumState {
                sum: Accumulator::for_type(input)?,
                count: 0,
            },
        })
    }

    fn current(&self) -> Value {
        if self.state.count == 0 {
            Value::Null
        } else {
            self.state.sum.value()
        }
    }
}

impl AttributeAggregator for SumAggregator {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn return_type(&self) -> AttributeType {
        match self.state.sum {
            Accumulator::Int(_) | Accumulator::Long(_) => AttributeType::Long,
            Accumulator::Float(_) | Accumulator::Double(_) => AttributeType::Double,
        }
    }

    fn process_add(&mut self, value: &Value) -> EngineResult<Value> {
        if value.is_null() {
            return Ok(self.current());
        }
        self.state.sum.apply(value, 1)?;
        self.state.count += 1;
        Ok(self.current())
    }

    fn process_remove(&mut self, value: &Value) -> EngineResult<Value> {
        if value.is_null() {
            return Ok(self.current());
        }
        self.check_remove(value)?;
        self.state.sum.apply(value, -1)?;
        self.state.count -= 1;
        if self.state.count == 0 {
            // Float rounding must not leave a residue behind an empty sum
            self.state.sum = self.state.sum.zeroed();
        }
        Ok(self.current())
    }

    fn check_remove(&self, value: &Value) -> EngineResult<()> {
        if !value.is_null() && self.state.count == 0 {
            return Err(EngineError::state_violation("sum", "remove without a matching add"));
        }
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<Value> {
        self.state.sum = self.state.sum.zeroed();
        self.state.count = 0;
        Ok(Value::Null)
    }

    fn can_destroy(&self) -> bool {
        self.state.count == 0 && self.state.sum.is_zero()
    }

    fn current_state(&self) -> EngineResult<serde_json::Value> {
        to_state("sum", &self.state)
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> EngineResult<()> {
        let restored: SumState = from_state("sum", state)?;
        if restored.sum.input_type() != self.state.sum.input_type() {
            return Err(EngineError::snapshot(
                "sum",
                format!(
                    "state is for {} input, aggregator takes {}",
                    restored.sum.input_type(),
                    self.state.sum.input_type()
                ),
            ));
        }
        self.state = restored;
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn AttributeAggregator> {
        Box::new(SumAggregator {
            state: SumState {
                sum: self.state.sum.zeroed(),
                count: 0,
            },
        })
    }
}
