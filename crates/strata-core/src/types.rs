//! Declared attribute types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of an attribute in a stream definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Int,
    Long,
    Float,
    Double,
    Bool,
    /// Opaque values such as sets produced by aggregators
    Object,
}

impl AttributeType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            AttributeType::Int | AttributeType::Long | AttributeType::Float | AttributeType::Double
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::String => "string",
            AttributeType::Int => "int",
            AttributeType::Long => "long",
            AttributeType::Float => "float",
            AttributeType::Double => "double",
            AttributeType::Bool => "bool",
            AttributeType::Object => "object",
        };
        f.write_str(name)
    }
}

/// Returned when a type name does not denote an [`AttributeType`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attribute type '{0}'")]
pub struct UnknownTypeError(pub String);

impl FromStr for AttributeType {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(AttributeType::String),
            "int" => Ok(AttributeType::Int),
            "long" => Ok(AttributeType::Long),
            "float" => Ok(AttributeType::Float),
            "double" => Ok(AttributeType::Double),
            "bool" | "boolean" => Ok(AttributeType::Bool),
            "object" => Ok(AttributeType::Object),
            other => Err(UnknownTypeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_classification() {
        assert!(AttributeType::Int.is_numeric());
        assert!(AttributeType::Double.is_numeric());
        assert!(!AttributeType::String.is_numeric());
        assert!(!AttributeType::Object.is_numeric());
    }

    #[test]
    fn test_parse_round_trips_display() {
        for ty in [
            AttributeType::String,
            AttributeType::Int,
            AttributeType::Long,
            AttributeType::Float,
            AttributeType::Double,
            AttributeType::Bool,
            AttributeType::Object,
        ] {
            assert_eq!(ty.to_string().parse::<AttributeType>(), Ok(ty));
        }
        assert!("decimal".parse::<AttributeType>().is_err());
    }
}
