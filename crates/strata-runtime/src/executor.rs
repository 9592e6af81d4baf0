//! Compiled attribute expressions
//!
//! The query compiler hands the runtime closures already bound to record
//! positions. [`ExpressionExecutor`] pairs such a closure with its declared
//! return type so aggregators can validate their inputs at construction.

use crate::event::{ComplexEvent, Position};
use std::fmt;
use std::sync::Arc;
use strata_core::{AttributeType, Value};

type Extract = Arc<dyn Fn(&ComplexEvent) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ExpressionExecutor {
    return_type: AttributeType,
    extract: Extract,
}

impl ExpressionExecutor {
    pub fn new(
        return_type: AttributeType,
        extract: impl Fn(&ComplexEvent) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            return_type,
            extract: Arc::new(extract),
        }
    }

    /// Read an attribute of a stream event, or of state slot 0 for
    /// correlation records.
    pub fn variable(pos: Position, return_type: AttributeType) -> Self {
        Self::new(return_type, move |event| match event {
            ComplexEvent::Stream(e) => e.attribute(pos).clone(),
            ComplexEvent::State(e) => e.attribute(0, pos).clone(),
        })
    }

    /// Read an attribute from one slot of a correlation record.
    pub fn state_variable(state_id: usize, pos: Position, return_type: AttributeType) -> Self {
        Self::new(return_type, move |event| match event {
            ComplexEvent::State(e) => e.attribute(state_id, pos).clone(),
            ComplexEvent::Stream(e) if state_id == 0 => e.attribute(pos).clone(),
            ComplexEvent::Stream(_) => Value::Null,
        })
    }

    pub fn constant(value: Value) -> Self {
        let ty = value.attribute_type().unwrap_or(AttributeType::Object);
        Self::new(ty, move |_| value.clone())
    }

    pub fn return_type(&self) -> AttributeType {
        self.return_type
    }

    pub fn execute(&self, event: &ComplexEvent) -> Value {
        (self.extract)(event)
    }
}

impl fmt::Debug for ExpressionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionExecutor")
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}
