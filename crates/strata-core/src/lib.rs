//! # Strata Core
//!
//! Foundational attribute types shared by the Strata continuous-query engine.
//!
//! Every event record flowing through a query carries a fixed-layout tuple of
//! [`Value`]s; the declared schema of those tuples is expressed with
//! [`AttributeType`]. Both are serializable so processor snapshots can embed
//! them directly.
//!
//! ## Modules
//!
//! - [`types`]: Declared attribute types (`Int`, `Long`, `Double`, ...)
//! - [`value`]: Runtime values with a total order, usable as map and set keys
//!
//! ## Quick Start
//!
//! ```rust
//! use strata_core::{AttributeType, Value};
//!
//! let price = Value::Double(101.5);
//! assert_eq!(price.attribute_type(), Some(AttributeType::Double));
//! assert_eq!(price.as_f64(), Some(101.5));
//!
//! // Values order totally, so they can key sets and maps
//! let mut seen = std::collections::BTreeSet::new();
//! seen.insert(Value::from("a"));
//! seen.insert(Value::from("a"));
//! assert_eq!(seen.len(), 1);
//! ```

pub mod types;
pub mod value;

pub use types::{AttributeType, UnknownTypeError};
pub use value::Value;
