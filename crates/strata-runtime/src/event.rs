//! Event records flowing through processor chains
//!
//! A [`StreamEvent`] is a fixed-layout attribute tuple split into three
//! zones: attributes read before any window, attributes available on and
//! after the window, and the projected output. A [`StateEvent`] is a
//! correlation record holding one optional stream event per state slot.
//! [`ComplexEvent`] unifies both so a single chunk type can carry either.

use serde::{Deserialize, Serialize};
use strata_core::Value;

/// Kind tag carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventKind {
    /// A new arrival
    #[default]
    Current,
    /// Evicted from a window or pattern
    Expired,
    /// Window boundary marker telling accumulators to clear
    Reset,
    /// Scheduler tick with no payload
    Timer,
}

/// Zone of a stream event an attribute lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    BeforeWindow,
    OnAfterWindow,
    Output,
}

/// Address of one attribute inside a stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub zone: Zone,
    pub index: usize,
}

impl Position {
    pub const fn before_window(index: usize) -> Self {
        Self {
            zone: Zone::BeforeWindow,
            index,
        }
    }

    pub const fn on_after_window(index: usize) -> Self {
        Self {
            zone: Zone::OnAfterWindow,
            index,
        }
    }

    pub const fn output(index: usize) -> Self {
        Self {
            zone: Zone::Output,
            index,
        }
    }
}

/// A single stream event record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub kind: EventKind,
    pub before_window_data: Vec<Value>,
    pub on_after_window_data: Vec<Value>,
    pub output_data: Vec<Value>,
}

impl StreamEvent {
    /// Create a zeroed record with the given zone sizes.
    pub fn new(before_window: usize, on_after_window: usize, output: usize) -> Self {
        Self {
            timestamp: 0,
            kind: EventKind::Current,
            before_window_data: vec![Value::Null; before_window],
            on_after_window_data: vec![Value::Null; on_after_window],
            output_data: vec![Value::Null; output],
        }
    }

    /// Create a payload-free timer tick.
    pub fn timer(timestamp: i64) -> Self {
        Self {
            timestamp,
            kind: EventKind::Timer,
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn zone(&self, zone: Zone) -> &[Value] {
        match zone {
            Zone::BeforeWindow => &self.before_window_data,
            Zone::OnAfterWindow => &self.on_after_window_data,
            Zone::Output => &self.output_data,
        }
    }

    fn zone_mut(&mut self, zone: Zone) -> &mut Vec<Value> {
        match zone {
            Zone::BeforeWindow => &mut self.before_window_data,
            Zone::OnAfterWindow => &mut self.on_after_window_data,
            Zone::Output => &mut self.output_data,
        }
    }

    /// Attribute at `pos`, `Null` when the zone is shorter.
    pub fn attribute(&self, pos: Position) -> &Value {
        static NULL: Value = Value::Null;
        self.zone(pos.zone).get(pos.index).unwrap_or(&NULL)
    }

    /// Set the attribute at `pos`, growing the zone if required.
    pub fn set_attribute(&mut self, pos: Position, value: Value) {
        let zone = self.zone_mut(pos.zone);
        if zone.len() <= pos.index {
            zone.resize(pos.index + 1, Value::Null);
        }
        zone[pos.index] = value;
    }

    /// Clear every attribute and return to a fresh `Current` record, keeping
    /// zone capacity for reuse.
    pub fn reset(&mut self) {
        self.timestamp = 0;
        self.kind = EventKind::Current;
        for zone in [
            &mut self.before_window_data,
            &mut self.on_after_window_data,
            &mut self.output_data,
        ] {
            zone.iter_mut().for_each(|v| *v = Value::Null);
        }
    }
}

/// A correlation record spanning several state slots
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateEvent {
    pub timestamp: i64,
    pub kind: EventKind,
    stream_events: Vec<Option<StreamEvent>>,
    pub output_data: Vec<Value>,
}

impl StateEvent {
    pub fn new(slots: usize, output: usize) -> Self {
        Self {
            timestamp: -1,
            kind: EventKind::Current,
            stream_events: vec![None; slots],
            output_data: vec![Value::Null; output],
        }
    }

    pub fn slot_count(&self) -> usize {
        self.stream_events.len()
    }

    pub fn stream_event(&self, state_id: usize) -> Option<&StreamEvent> {
        self.stream_events.get(state_id).and_then(Option::as_ref)
    }

    /// Fill or clear one slot. Slots beyond the record's size are ignored.
    pub fn set_stream_event(&mut self, state_id: usize, event: Option<StreamEvent>) {
        if let Some(slot) = self.stream_events.get_mut(state_id) {
            *slot = event;
        }
    }

    pub fn take_stream_event(&mut self, state_id: usize) -> Option<StreamEvent> {
        self.stream_events.get_mut(state_id).and_then(Option::take)
    }

    pub fn slots(&self) -> &[Option<StreamEvent>] {
        &self.stream_events
    }

    /// True while no slot has been filled.
    pub fn is_unstarted(&self) -> bool {
        self.stream_events.iter().all(Option::is_none)
    }

    /// Attribute of the stream event in `state_id`, `Null` for an empty slot.
    pub fn attribute(&self, state_id: usize, pos: Position) -> &Value {
        static NULL: Value = Value::Null;
        self.stream_event(state_id)
            .map_or(&NULL, |event| event.attribute(pos))
    }

    pub fn reset(&mut self) {
        self.timestamp = -1;
        self.kind = EventKind::Current;
        self.stream_events.iter_mut().for_each(|s| *s = None);
        self.output_data.iter_mut().for_each(|v| *v = Value::Null);
    }
}

/// Either kind of record, as carried by an [`EventChunk`](crate::chunk::EventChunk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComplexEvent {
    Stream(StreamEvent),
    State(StateEvent),
}

impl ComplexEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            ComplexEvent::Stream(e) => e.timestamp,
            ComplexEvent::State(e) => e.timestamp,
        }
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        match self {
            ComplexEvent::Stream(e) => e.timestamp = timestamp,
            ComplexEvent::State(e) => e.timestamp = timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ComplexEvent::Stream(e) => e.kind,
            ComplexEvent::State(e) => e.kind,
        }
    }

    pub fn set_kind(&mut self, kind: EventKind) {
        match self {
            ComplexEvent::Stream(e) => e.kind = kind,
            ComplexEvent::State(e) => e.kind = kind,
        }
    }

    pub fn output_data(&self) -> &[Value] {
        match self {
            ComplexEvent::Stream(e) => &e.output_data,
            ComplexEvent::State(e) => &e.output_data,
        }
    }

    pub fn output_data_mut(&mut self) -> &mut Vec<Value> {
        match self {
            ComplexEvent::Stream(e) => &mut e.output_data,
            ComplexEvent::State(e) => &mut e.output_data,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamEvent> {
        match self {
            ComplexEvent::Stream(e) => Some(e),
            ComplexEvent::State(_) => None,
        }
    }

    pub fn as_state(&self) -> Option<&StateEvent> {
        match self {
            ComplexEvent::State(e) => Some(e),
            ComplexEvent::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<StreamEvent> {
        match self {
            ComplexEvent::Stream(e) => Some(e),
            ComplexEvent::State(_) => None,
        }
    }

    pub fn into_state(self) -> Option<StateEvent> {
        match self {
            ComplexEvent::State(e) => Some(e),
            ComplexEvent::Stream(_) => None,
        }
    }
}

impl From<StreamEvent> for ComplexEvent {
    fn from(e: StreamEvent) -> Self {
        ComplexEvent::Stream(e)
    }
}

impl From<StateEvent> for ComplexEvent {
    fn from(e: StateEvent) -> Self {
        ComplexEvent::State(e)
    }
}
