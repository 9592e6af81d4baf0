//! Sliding length window

use crate::chunk::EventChunk;
use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::event::{ComplexEvent, EventKind, StateEvent, StreamEvent};
use crate::findable::{self, CompiledCondition, FindableProcessor, MatchExpression, MatchingMeta};
use crate::pool::StreamEventCloner;
use crate::processor::{NextProcessor, Processor, ProcessorRef};
use crate::snapshot::{Snapshot, Snapshotable};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use strata_core::Value;

/// Keeps the last `length` events. Each arrival beyond that evicts the
/// oldest, which is forwarded as `Expired` ahead of the arrival.
///
/// A zero-length window retains nothing and forwards arrivals unchanged;
/// joins use it for sides that have no window of their own.
pub struct LengthWindow {
    element_id: String,
    length: usize,
    cloner: StreamEventCloner,
    ctx: QueryContext,
    buffer: ReentrantMutex<RefCell<VecDeque<StreamEvent>>>,
    next: NextProcessor,
}

impl LengthWindow {
    pub fn new(length: usize, cloner: StreamEventCloner, ctx: &QueryContext) -> Arc<Self> {
        let element_id = ctx.next_element_id("LengthWindow");
        Self::build(element_id, length, cloner, ctx)
    }

    pub fn from_parameters(params: &[Value], cloner: StreamEventCloner, ctx: &QueryContext) -> EngineResult<Arc<Self>> {
        match params {
            [v] => match v.as_i64() {
                Some(n) if n >= 0 => Ok(Self::new(n as usize, cloner, ctx)),
                Some(n) => Err(EngineError::validation(
                    "length window",
                    format!("length must not be negative, found {n}"),
                )),
                None => Err(EngineError::validation(
                    "length window",
                    format!("length must be int or long, found {}", v.type_name()),
                )),
            },
            _ => Err(EngineError::validation(
                "length window",
                format!("expects 1 parameter, found {}", params.len()),
            )),
        }
    }

    fn build(element_id: String, length: usize, cloner: StreamEventCloner, ctx: &QueryContext) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<LengthWindow>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            LengthWindow {
                element_id,
                length,
                cloner,
                ctx: ctx.clone(),
                buffer: ReentrantMutex::new(RefCell::new(VecDeque::with_capacity(length))),
                next: NextProcessor::new(),
            }
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn retained(&self) -> usize {
        let guard = self.buffer.lock();
        let n = guard.borrow().len();
        n
    }
}

impl Processor for LengthWindow {
    fn name(&self) -> &'static str {
        "length window"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let mut out = EventChunk::new();
        {
            let guard = self.buffer.lock();
            let mut buffer = guard.borrow_mut();
            for event in chunk {
                let ComplexEvent::Stream(event) = event else {
                    continue;
                };
                if event.kind != EventKind::Current {
                    continue;
                }
                if self.length > 0 {
                    if buffer.len() >= self.length {
                        if let Some(mut oldest) = buffer.pop_front() {
                            oldest.kind = EventKind::Expired;
                            oldest.timestamp = event.timestamp;
                            out.push(oldest);
                        }
                    }
                    buffer.push_back(self.cloner.copy_stream_event(&event));
                }
                out.push(event);
            }
        }
        self.next.forward(out)
    }

    fn next_processor(&self) -> Option<ProcessorRef> {
        self.next.get()
    }

    fn set_next_processor(&self, next: Option<ProcessorRef>) {
        self.next.set(next);
    }

    fn clone_processor(&self, key: &str) -> EngineResult<ProcessorRef> {
        Ok(Self::build(
            format!("{}-{}", self.element_id, key),
            self.length,
            self.cloner.clone(),
            &self.ctx,
        ))
    }

    fn as_findable(self: Arc<Self>) -> Option<Arc<dyn FindableProcessor>> {
        Some(self)
    }
}

impl FindableProcessor for LengthWindow {
    fn find(&self, matching: &StateEvent, condition: &CompiledCondition) -> EngineResult<Vec<StreamEvent>> {
        let guard = self.buffer.lock();
        let buffer = guard.borrow();
        Ok(findable::find_matches(buffer.iter(), matching, condition, &self.cloner))
    }

    fn compile_condition(&self, expression: MatchExpression, meta: MatchingMeta) -> EngineResult<CompiledCondition> {
        findable::compile(expression, meta)
    }
}

impl Snapshotable for LengthWindow {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        let guard = self.buffer.lock();
        let buffer = guard.borrow();
        Snapshot::new(&self.element_id).with("buffer", &*buffer)
    }

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let restored: VecDeque<StreamEvent> = snapshot.get("buffer")?;
        let guard = self.buffer.lock();
        *guard.borrow_mut() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use crate::event::Position;
    use crate::pool::StreamEventPool;
    use crate::sink::CollectingSink;

    fn setup(length: usize) -> (Arc<LengthWindow>, Arc<CollectingSink>) {
        let app = AppContext::with_system_clock("test");
        let cloner = StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 1, 0, 8)));
        let window = LengthWindow::new(length, cloner, &app.query("q"));
        let sink = Arc::new(CollectingSink::new());
        window.set_next_processor(Some(sink.clone()));
        (window, sink)
    }

    fn event(ts: i64) -> EventChunk {
        let mut e = StreamEvent::new(0, 1, 0).with_timestamp(ts);
        e.set_attribute(Position::on_after_window(0), Value::Long(ts));
        EventChunk::single(e)
    }

    #[test]
    fn test_evicts_oldest_before_arrival() {
        let (window, sink) = setup(2);
        for ts in [1, 2, 3] {
            window.process(event(ts)).unwrap();
        }
        let events = sink.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].kind(), EventKind::Expired);
        assert_eq!(
            events[2].as_stream().unwrap().attribute(Position::on_after_window(0)),
            &Value::Long(1)
        );
        assert_eq!(events[2].timestamp(), 3);
        assert_eq!(window.retained(), 2);
    }

    #[test]
    fn test_zero_length_is_pass_through() {
        let (window, sink) = setup(0);
        window.process(event(1)).unwrap();
        window.process(event(2)).unwrap();
        assert_eq!(sink.events_of(EventKind::Current).len(), 2);
        assert_eq!(window.retained(), 0);
    }

    #[test]
    fn test_parameters() {
        let app = AppContext::with_system_clock("test");
        let cloner = StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 1, 0, 8)));
        let ctx = app.query("q");
        assert!(LengthWindow::from_parameters(&[], cloner.clone(), &ctx).is_err());
        assert!(LengthWindow::from_parameters(&[Value::Int(-1)], cloner.clone(), &ctx).is_err());
        assert!(LengthWindow::from_parameters(&[Value::from("5")], cloner.clone(), &ctx).is_err());
        assert_eq!(
            LengthWindow::from_parameters(&[Value::Int(5)], cloner, &ctx).unwrap().length(),
            5
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (window, _) = setup(3);
        window.process(event(1)).unwrap();
        window.process(event(2)).unwrap();
        let snap = window.current_state().unwrap();

        let (fresh, _) = setup(3);
        fresh.restore_state(&snap).unwrap();
        assert_eq!(fresh.retained(), 2);
    }
}
