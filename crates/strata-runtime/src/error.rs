//! Engine error types

use strata_core::AttributeType;
use thiserror::Error;

/// Errors raised while building or running a query.
///
/// Construction-time problems surface as [`EngineError::Validation`] and keep
/// the query from being deployed. The remaining variants are raised while
/// processing and are fatal for the query instance that produced them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid {component} configuration: {message}")]
    Validation {
        component: &'static str,
        message: String,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("state invariant violated in {component}: {message}")]
    StateViolation {
        component: &'static str,
        message: String,
    },

    #[error("type mismatch in {component}: expected {expected}, found {found}")]
    TypeMismatch {
        component: &'static str,
        expected: AttributeType,
        found: String,
    },

    #[error("snapshot error for element '{element_id}': {message}")]
    Snapshot { element_id: String, message: String },

    #[error("persistence store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn validation(component: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            component,
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        EngineError::IllegalState(message.into())
    }

    pub fn state_violation(component: &'static str, message: impl Into<String>) -> Self {
        EngineError::StateViolation {
            component,
            message: message.into(),
        }
    }

    pub fn snapshot(element_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Snapshot {
            element_id: element_id.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
