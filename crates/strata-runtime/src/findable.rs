//! Indexed lookup against a processor's retained events
//!
//! Windows and tables keep events around after they have been forwarded.
//! Joins probe those retained sets through [`FindableProcessor::find`] using
//! a condition compiled once at query construction.

use crate::error::{EngineError, EngineResult};
use crate::event::{StateEvent, StreamEvent};
use crate::pool::StreamEventCloner;
use crate::processor::Processor;
use std::fmt;
use std::sync::Arc;

/// Matching expression: the probing correlation record against one retained
/// candidate.
pub type MatchExpression = Arc<dyn Fn(&StateEvent, &StreamEvent) -> bool + Send + Sync>;

/// Shape of the correlation records that will probe a findable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingMeta {
    /// Slot a found candidate occupies in the combined record
    pub candidate_state_id: usize,
    /// Total slots of the probing record
    pub slot_count: usize,
}

/// A matching expression bound to one findable processor
#[derive(Clone)]
pub struct CompiledCondition {
    expression: MatchExpression,
    meta: MatchingMeta,
}

impl CompiledCondition {
    pub fn meta(&self) -> MatchingMeta {
        self.meta
    }

    pub fn matches(&self, matching: &StateEvent, candidate: &StreamEvent) -> bool {
        (self.expression)(matching, candidate)
    }
}

impl fmt::Debug for CompiledCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCondition")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Validate `meta` and bind `expression` to it.
pub fn compile(expression: MatchExpression, meta: MatchingMeta) -> EngineResult<CompiledCondition> {
    if meta.candidate_state_id >= meta.slot_count {
        return Err(EngineError::validation(
            "findable",
            format!(
                "candidate slot {} outside a {}-slot record",
                meta.candidate_state_id, meta.slot_count
            ),
        ));
    }
    Ok(CompiledCondition { expression, meta })
}

/// Clone every retained event matching `condition`. Never mutates `retained`.
pub fn find_matches<'a>(
    retained: impl IntoIterator<Item = &'a StreamEvent>,
    matching: &StateEvent,
    condition: &CompiledCondition,
    cloner: &StreamEventCloner,
) -> Vec<StreamEvent> {
    retained
        .into_iter()
        .filter(|candidate| condition.matches(matching, candidate))
        .map(|candidate| cloner.copy_stream_event(candidate))
        .collect()
}

/// A processor supporting point lookup into what it retains
pub trait FindableProcessor: Processor {
    /// Retained events matching `condition` for the probing record.
    fn find(&self, matching: &StateEvent, condition: &CompiledCondition) -> EngineResult<Vec<StreamEvent>>;

    /// Bind a matching expression to this processor. Windows that only
    /// retain on demand start retaining here.
    fn compile_condition(&self, expression: MatchExpression, meta: MatchingMeta) -> EngineResult<CompiledCondition>;

    /// Static sources (tables) never receive streamed arrivals.
    fn is_static(&self) -> bool {
        false
    }
}
