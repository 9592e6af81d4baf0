//! Processor chain contract
//!
//! A query is a linked list of processors. Each node receives a chunk it
//! exclusively owns, does its work and forwards what remains to its
//! successor. Successor links use interior mutability so chains can be
//! rewired after construction (join builders splice processors in around a
//! findable node) while shared behind `Arc`.

use crate::chunk::EventChunk;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind};
use crate::findable::FindableProcessor;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared processor handle
pub type ProcessorRef = Arc<dyn Processor>;

/// Boolean condition evaluated against one record.
pub type Condition = Arc<dyn Fn(&ComplexEvent) -> bool + Send + Sync>;

/// A node in a processor chain
pub trait Processor: Send + Sync {
    /// Short component name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Consume a chunk and forward results downstream.
    fn process(&self, chunk: EventChunk) -> EngineResult<()>;

    /// Consume a chunk and hand results back to the caller instead of
    /// forwarding them. Only correlation processors support this.
    fn process_and_return(&self, _chunk: EventChunk) -> EngineResult<EventChunk> {
        Err(EngineError::illegal_state(format!(
            "{} does not support process_and_return; use process",
            self.name()
        )))
    }

    fn next_processor(&self) -> Option<ProcessorRef>;

    fn set_next_processor(&self, next: Option<ProcessorRef>);

    /// Append `processor` at the tail of the chain.
    fn set_to_last(&self, processor: ProcessorRef) {
        match self.next_processor() {
            Some(next) => next.set_to_last(processor),
            None => self.set_next_processor(Some(processor)),
        }
    }

    /// Fresh instance sharing immutable configuration, with independent
    /// mutable state, for the partition identified by `key`. The clone has
    /// no successor.
    fn clone_processor(&self, key: &str) -> EngineResult<ProcessorRef>;

    /// Indexed-lookup view of this processor, if it retains events.
    fn as_findable(self: Arc<Self>) -> Option<Arc<dyn FindableProcessor>> {
        None
    }
}

/// Successor slot embedded by processors
#[derive(Default)]
pub struct NextProcessor(RwLock<Option<ProcessorRef>>);

impl NextProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ProcessorRef> {
        self.0.read().clone()
    }

    pub fn set(&self, next: Option<ProcessorRef>) {
        *self.0.write() = next;
    }

    /// Forward a non-empty chunk to the successor, if any.
    pub fn forward(&self, chunk: EventChunk) -> EngineResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self.get() {
            Some(next) => next.process(chunk),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for NextProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(next) => write!(f, "NextProcessor({})", next.name()),
            None => write!(f, "NextProcessor(None)"),
        }
    }
}

/// Clone a whole chain for a partition, relinking the copies in order.
pub fn clone_chain(head: &ProcessorRef, key: &str) -> EngineResult<ProcessorRef> {
    let new_head = head.clone_processor(key)?;
    let mut tail = new_head.clone();
    let mut cursor = head.next_processor();
    while let Some(original) = cursor {
        let copy = original.clone_processor(key)?;
        tail.set_next_processor(Some(copy.clone()));
        tail = copy;
        cursor = original.next_processor();
    }
    Ok(new_head)
}

/// Drops records whose condition is false.
///
/// Reset and timer records carry no meaningful payload for a condition and
/// always pass through.
pub struct FilterProcessor {
    condition: Condition,
    next: NextProcessor,
}

impl FilterProcessor {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            next: NextProcessor::new(),
        }
    }

    pub fn from_fn(f: impl Fn(&ComplexEvent) -> bool + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(f))
    }
}

impl Processor for FilterProcessor {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn process(&self, mut chunk: EventChunk) -> EngineResult<()> {
        chunk.retain(|event| match event.kind() {
            EventKind::Reset | EventKind::Timer => true,
            EventKind::Current | EventKind::Expired => (self.condition)(event),
        });
        self.next.forward(chunk)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    fn clone_processor(&self, _key: &str) -> EngineResult<ProcessorRef> {
        Ok(Arc::new(FilterProcessor::new(self.condition.clone())))
    }
}
