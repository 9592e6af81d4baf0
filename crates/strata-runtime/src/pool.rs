//! Record pools, cloners and the input converter
//!
//! Pools hand out zeroed records shaped by a [`MetaStreamEvent`] layout and
//! take storage back on release, so the hot path reuses zone vectors rather
//! than allocating per event. A borrowed record is exclusively owned by the
//! caller; retaining a record past the call that delivered it goes through a
//! cloner, which copies values into another pooled record.

use crate::error::{EngineError, EngineResult};
use crate::event::{EventKind, Position, StateEvent, StreamEvent, Zone};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{AttributeType, Value};

/// Default number of released records a pool keeps for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// A named, typed attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub ty: AttributeType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Layout of a stream event: which attributes live in which zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaStreamEvent {
    pub before_window: Vec<Attribute>,
    pub on_after_window: Vec<Attribute>,
    pub output: Vec<Attribute>,
}

impl MetaStreamEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_window(mut self, name: &str, ty: AttributeType) -> Self {
        self.before_window.push(Attribute::new(name, ty));
        self
    }

    pub fn with_on_after_window(mut self, name: &str, ty: AttributeType) -> Self {
        self.on_after_window.push(Attribute::new(name, ty));
        self
    }

    pub fn with_output(mut self, name: &str, ty: AttributeType) -> Self {
        self.output.push(Attribute::new(name, ty));
        self
    }

    /// Layout with every attribute in the on/after-window zone.
    pub fn on_after_window_only(attributes: &[(&str, AttributeType)]) -> Self {
        attributes
            .iter()
            .fold(Self::new(), |meta, (name, ty)| meta.with_on_after_window(name, *ty))
    }

    /// First position holding `name`, searching output then on/after-window
    /// then before-window.
    pub fn position_of(&self, name: &str) -> Option<Position> {
        let find = |attrs: &[Attribute]| attrs.iter().position(|a| a.name == name);
        find(&self.output)
            .map(Position::output)
            .or_else(|| find(&self.on_after_window).map(Position::on_after_window))
            .or_else(|| find(&self.before_window).map(Position::before_window))
    }

    pub fn type_at(&self, pos: Position) -> Option<AttributeType> {
        let zone = match pos.zone {
            Zone::BeforeWindow => &self.before_window,
            Zone::OnAfterWindow => &self.on_after_window,
            Zone::Output => &self.output,
        };
        zone.get(pos.index).map(|a| a.ty)
    }
}

/// Pool of stream event records
#[derive(Debug)]
pub struct StreamEventPool {
    before_window: usize,
    on_after_window: usize,
    output: usize,
    capacity: usize,
    free: Mutex<Vec<StreamEvent>>,
}

impl StreamEventPool {
    pub fn new(meta: &MetaStreamEvent, capacity: usize) -> Self {
        Self::with_sizes(
            meta.before_window.len(),
            meta.on_after_window.len(),
            meta.output.len(),
            capacity,
        )
    }

    pub fn with_sizes(before_window: usize, on_after_window: usize, output: usize, capacity: usize) -> Self {
        Self {
            before_window,
            on_after_window,
            output,
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Hand out a zeroed record, reusing released storage when available.
    pub fn borrow_event(&self) -> StreamEvent {
        match self.free.lock().pop() {
            Some(mut event) => {
                event.reset();
                event
            }
            None => StreamEvent::new(self.before_window, self.on_after_window, self.output),
        }
    }

    /// Return a record's storage. Records beyond capacity are dropped.
    pub fn release(&self, event: StreamEvent) {
        let mut free = self.free.lock();
        if free.len() < self.capacity && self.fits(&event) {
            free.push(event);
        }
    }

    /// Number of records waiting to be reused.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    fn fits(&self, event: &StreamEvent) -> bool {
        event.before_window_data.len() == self.before_window
            && event.on_after_window_data.len() == self.on_after_window
            && event.output_data.len() == self.output
    }
}

/// Pool of correlation records
#[derive(Debug)]
pub struct StateEventPool {
    slots: usize,
    output: usize,
    capacity: usize,
    free: Mutex<Vec<StateEvent>>,
}

impl StateEventPool {
    pub fn new(slots: usize, output: usize, capacity: usize) -> Self {
        Self {
            slots,
            output,
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn borrow_event(&self) -> StateEvent {
        match self.free.lock().pop() {
            Some(mut event) => {
                event.reset();
                event
            }
            None => StateEvent::new(self.slots, self.output),
        }
    }

    pub fn release(&self, event: StateEvent) {
        let mut free = self.free.lock();
        if free.len() < self.capacity && event.slot_count() == self.slots {
            free.push(event);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

/// Copies stream events into pooled storage
#[derive(Debug, Clone)]
pub struct StreamEventCloner {
    pool: Arc<StreamEventPool>,
}

impl StreamEventCloner {
    pub fn new(pool: Arc<StreamEventPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<StreamEventPool> {
        &self.pool
    }

    pub fn copy_stream_event(&self, event: &StreamEvent) -> StreamEvent {
        let mut copy = self.pool.borrow_event();
        copy.timestamp = event.timestamp;
        copy.kind = event.kind;
        copy.before_window_data.clone_from(&event.before_window_data);
        copy.on_after_window_data.clone_from(&event.on_after_window_data);
        copy.output_data.clone_from(&event.output_data);
        copy
    }

    /// Copy with a different kind, used for expired and reset records.
    pub fn copy_as(&self, event: &StreamEvent, kind: EventKind) -> StreamEvent {
        let mut copy = self.copy_stream_event(event);
        copy.kind = kind;
        copy
    }
}

/// Deep-copies correlation records, including every filled slot
#[derive(Debug, Clone)]
pub struct StateEventCloner {
    pool: Arc<StateEventPool>,
    stream_cloner: StreamEventCloner,
}

impl StateEventCloner {
    pub fn new(pool: Arc<StateEventPool>, stream_cloner: StreamEventCloner) -> Self {
        Self {
            pool,
            stream_cloner,
        }
    }

    pub fn pool(&self) -> &Arc<StateEventPool> {
        &self.pool
    }

    pub fn copy_state_event(&self, event: &StateEvent) -> StateEvent {
        let mut copy = self.pool.borrow_event();
        copy.timestamp = event.timestamp;
        copy.kind = event.kind;
        for (id, slot) in event.slots().iter().enumerate() {
            copy.set_stream_event(
                id,
                slot.as_ref().map(|e| self.stream_cloner.copy_stream_event(e)),
            );
        }
        copy.output_data.clone_from(&event.output_data);
        copy
    }
}

/// Converts raw input tuples into pooled stream events
#[derive(Debug, Clone)]
pub struct StreamEventConverter {
    pool: Arc<StreamEventPool>,
    /// Target position of each input attribute, by input index
    mapping: Vec<Position>,
}

impl StreamEventConverter {
    pub fn new(pool: Arc<StreamEventPool>, mapping: Vec<Position>) -> Self {
        Self { pool, mapping }
    }

    /// Map input attributes onto the layout by name.
    pub fn for_layout(
        pool: Arc<StreamEventPool>,
        input: &[Attribute],
        meta: &MetaStreamEvent,
    ) -> EngineResult<Self> {
        let mapping = input
            .iter()
            .map(|attr| {
                meta.position_of(&attr.name).ok_or_else(|| {
                    EngineError::validation(
                        "input converter",
                        format!("attribute '{}' is not part of the event layout", attr.name),
                    )
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self::new(pool, mapping))
    }

    pub fn convert(&self, timestamp: i64, data: &[Value]) -> EngineResult<StreamEvent> {
        if data.len() != self.mapping.len() {
            return Err(EngineError::illegal_state(format!(
                "input carries {} attributes, stream defines {}",
                data.len(),
                self.mapping.len()
            )));
        }
        let mut event = self.pool.borrow_event();
        event.timestamp = timestamp;
        for (value, pos) in data.iter().zip(&self.mapping) {
            event.set_attribute(*pos, value.clone());
        }
        Ok(event)
    }
}
