//! Tumbling time-batch window
//!
//! Holds arriving events until the clock crosses the next boundary, then
//! emits one batch chunk: previously expired events (timestamps rewritten to
//! the emission instant), a reset marker, and the held batch. Boundaries are
//! checked on every arrival and on scheduler timer callbacks.

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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use strata_core::Value;
use tracing::{debug, trace};

const UNSET: i64 = -1;

/// Window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBatchConfig {
    /// Batch span in milliseconds
    pub span: i64,
    /// Align boundaries to `start_time + k * span`
    pub start_time: Option<i64>,
    /// Forward arrivals immediately; the batch boundary then only expires them
    pub stream_current_events: bool,
}

impl TimeBatchConfig {
    pub fn new(span: i64) -> Self {
        Self {
            span,
            start_time: None,
            stream_current_events: false,
        }
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn streaming_current_events(mut self) -> Self {
        self.stream_current_events = true;
        self
    }

    /// Build from query parameters: `(span)`, `(span, start_time)`,
    /// `(span, stream_current)` or `(span, start_time, stream_current)`.
    pub fn from_parameters(params: &[Value]) -> EngineResult<Self> {
        let span = match params.first() {
            Some(v) => v.as_i64().ok_or_else(|| {
                invalid(format!("window time must be int or long, found {}", v.type_name()))
            })?,
            None => return Err(invalid("expects 1 to 3 parameters, found none")),
        };
        let mut config = TimeBatchConfig::new(span);
        match &params[1..] {
            [] => {}
            [Value::Bool(stream)] => config.stream_current_events = *stream,
            [start] => config.start_time = Some(start_time(start)?),
            [start, Value::Bool(stream)] => {
                config.start_time = Some(start_time(start)?);
                config.stream_current_events = *stream;
            }
            [_, other] => {
                return Err(invalid(format!(
                    "stream current events flag must be bool, found {}",
                    other.type_name()
                )))
            }
            _ => {
                return Err(invalid(format!(
                    "expects 1 to 3 parameters, found {}",
                    params.len()
                )))
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.span <= 0 {
            return Err(invalid(format!("window time must be positive, found {}", self.span)));
        }
        Ok(())
    }

    /// First boundary after `now`. Boundaries past `i64::MAX` clamp to it.
    fn first_emit_time(&self, now: i64) -> i64 {
        match self.start_time {
            Some(start) => {
                let offset = (i128::from(now) - i128::from(start)).rem_euclid(i128::from(self.span));
                // offset < span, so the difference fits
                now.saturating_add(self.span - offset as i64)
            }
            None => now.saturating_add(self.span),
        }
    }

    /// First boundary after `now`, stepping from a boundary at or before it.
    fn next_emit_after(&self, boundary: i64, now: i64) -> i64 {
        let periods = (now.saturating_sub(boundary) / self.span).saturating_add(1);
        boundary.saturating_add(periods.saturating_mul(self.span))
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::validation("timeBatch window", message)
}

fn start_time(v: &Value) -> EngineResult<i64> {
    v.as_i64()
        .ok_or_else(|| invalid(format!("start time must be int or long, found {}", v.type_name())))
}

#[derive(Debug, Default)]
struct BatchState {
    next_emit_time: i64,
    current: Vec<StreamEvent>,
    expired: Option<Vec<StreamEvent>>,
    reset_event: Option<StreamEvent>,
}

/// Tumbling batch window over wall-clock time
pub struct TimeBatchWindow {
    element_id: String,
    config: TimeBatchConfig,
    output_expects_expired: bool,
    /// Retain expired events for lookups even when output does not need them
    retain_expired: AtomicBool,
    ctx: QueryContext,
    cloner: StreamEventCloner,
    state: ReentrantMutex<RefCell<BatchState>>,
    next: NextProcessor,
    this: Weak<TimeBatchWindow>,
}

impl TimeBatchWindow {
    pub fn new(
        config: TimeBatchConfig,
        output_expects_expired: bool,
        cloner: StreamEventCloner,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Self>> {
        config.validate()?;
        let element_id = ctx.next_element_id("TimeBatchWindow");
        Ok(Self::build(element_id, config, output_expects_expired, false, cloner, ctx))
    }

    fn build(
        element_id: String,
        config: TimeBatchConfig,
        output_expects_expired: bool,
        retain_expired: bool,
        cloner: StreamEventCloner,
        ctx: &QueryContext,
    ) -> Arc<Self> {
        let window = Arc::new_cyclic(|this: &Weak<TimeBatchWindow>| {
            let snapshotable: Weak<dyn Snapshotable> = this.clone();
            ctx.register_snapshotable(&element_id, snapshotable);
            let state = BatchState {
                next_emit_time: UNSET,
                expired: (output_expects_expired || retain_expired).then(Vec::new),
                ..BatchState::default()
            };
            TimeBatchWindow {
                element_id,
                config,
                output_expects_expired,
                retain_expired: AtomicBool::new(retain_expired),
                ctx: ctx.clone(),
                cloner,
                state: ReentrantMutex::new(RefCell::new(state)),
                next: NextProcessor::new(),
                this: this.clone(),
            }
        });
        debug!(
            "Created {} (span {}ms, start {:?}, stream current {})",
            window.element_id, config.span, config.start_time, config.stream_current_events
        );
        window
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn config(&self) -> TimeBatchConfig {
        self.config
    }

    /// Next boundary, `None` before the first arrival.
    pub fn next_emit_time(&self) -> Option<i64> {
        let guard = self.state.lock();
        let next = guard.borrow().next_emit_time;
        (next != UNSET).then_some(next)
    }

    /// Number of events held for the next batch.
    pub fn held(&self) -> usize {
        let guard = self.state.lock();
        let held = guard.borrow().current.len();
        held
    }

    fn schedule(&self, at: i64) {
        let target: Weak<dyn Processor> = self.this.clone();
        self.ctx.scheduler().notify_at(at, target);
    }

    /// Close the held batch into `out`, in expired, reset, current order.
    fn emit(&self, st: &mut BatchState, now: i64, out: &mut EventChunk) {
        if let Some(expired) = st.expired.as_mut() {
            if self.output_expects_expired {
                for mut event in expired.drain(..) {
                    event.timestamp = now;
                    out.push(event);
                }
            } else {
                let pool = self.cloner.pool();
                expired.drain(..).for_each(|e| pool.release(e));
            }
        }

        if let Some(reset) = st.reset_event.take() {
            out.push(reset);
        }

        if !st.current.is_empty() {
            if let Some(expired) = st.expired.as_mut() {
                expired.extend(
                    st.current
                        .iter()
                        .map(|e| self.cloner.copy_as(e, EventKind::Expired)),
                );
            }
            out.extend(st.current.drain(..));
        }
    }
}

impl Processor for TimeBatchWindow {
    fn name(&self) -> &'static str {
        "timeBatch window"
    }

    fn process(&self, chunk: EventChunk) -> EngineResult<()> {
        let mut out = EventChunk::batch();
        {
            let guard = self.state.lock();
            let mut st = guard.borrow_mut();
            let now = self.ctx.current_time();

            if st.next_emit_time == UNSET {
                st.next_emit_time = self.config.first_emit_time(now);
                self.schedule(st.next_emit_time);
            }

            if now >= st.next_emit_time {
                st.next_emit_time = self.config.next_emit_after(st.next_emit_time, now);
                self.schedule(st.next_emit_time);
                trace!("{} emitting at {}", self.element_id, now);
                self.emit(&mut st, now, &mut out);
            }

            let mut passthrough = Vec::new();
            for event in chunk {
                let ComplexEvent::Stream(event) = event else {
                    continue;
                };
                if event.kind != EventKind::Current {
                    continue;
                }
                if st.reset_event.is_none() {
                    st.reset_event = Some(self.cloner.copy_as(&event, EventKind::Reset));
                }
                if self.config.stream_current_events {
                    if let Some(expired) = st.expired.as_mut() {
                        expired.push(self.cloner.copy_as(&event, EventKind::Expired));
                    }
                    passthrough.push(event);
                } else {
                    st.current.push(self.cloner.copy_stream_event(&event));
                    self.cloner.pool().release(event);
                }
            }
            out.extend(passthrough);
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
            self.config,
            self.output_expects_expired,
            self.retain_expired.load(Ordering::Acquire),
            self.cloner.clone(),
            &self.ctx,
        ))
    }

    fn as_findable(self: Arc<Self>) -> Option<Arc<dyn FindableProcessor>> {
        Some(self)
    }
}

impl FindableProcessor for TimeBatchWindow {
    fn find(&self, matching: &StateEvent, condition: &CompiledCondition) -> EngineResult<Vec<StreamEvent>> {
        let guard = self.state.lock();
        let st = guard.borrow();
        Ok(st
            .expired
            .as_ref()
            .map(|expired| findable::find_matches(expired, matching, condition, &self.cloner))
            .unwrap_or_default())
    }

    fn compile_condition(&self, expression: MatchExpression, meta: MatchingMeta) -> EngineResult<CompiledCondition> {
        self.retain_expired.store(true, Ordering::Release);
        let guard = self.state.lock();
        guard.borrow_mut().expired.get_or_insert_with(Vec::new);
        findable::compile(expression, meta)
    }
}

impl Snapshotable for TimeBatchWindow {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn current_state(&self) -> EngineResult<Snapshot> {
        let guard = self.state.lock();
        let st = guard.borrow();
        Snapshot::new(&self.element_id)
            .with("next_emit_time", &st.next_emit_time)?
            .with("current", &st.current)?
            .with("expired", &st.expired)?
            .with("reset_event", &st.reset_event)
    }

    fn restore_state(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let next_emit_time: i64 = snapshot.get("next_emit_time")?;
        let current = snapshot.get("current")?;
        let expired: Option<Vec<StreamEvent>> = snapshot.get("expired")?;
        let reset_event = snapshot.get("reset_event")?;
        {
            let guard = self.state.lock();
            let mut st = guard.borrow_mut();
            st.next_emit_time = next_emit_time;
            st.current = current;
            st.reset_event = reset_event;
            let keep_expired = self.output_expects_expired || self.retain_expired.load(Ordering::Acquire);
            st.expired = match expired {
                Some(events) => Some(events),
                None => keep_expired.then(Vec::new),
            };
        }
        if next_emit_time != UNSET {
            self.schedule(next_emit_time);
        }
        debug!("Restored {} with next emit at {}", self.element_id, next_emit_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::AppContext;
    use crate::event::Position;
    use crate::pool::StreamEventPool;
    use crate::scheduler::ManualClock;
    use crate::sink::CollectingSink;

    fn setup(config: TimeBatchConfig, expired: bool) -> (Arc<ManualClock>, Arc<TimeBatchWindow>, Arc<CollectingSink>) {
        let clock = Arc::new(ManualClock::new(0));
        let app = AppContext::new("test", clock.clone(), EngineConfig::default());
        let ctx = app.query("q");
        let cloner = StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 1, 0, 16)));
        let window = TimeBatchWindow::new(config, expired, cloner, &ctx).unwrap();
        let sink = Arc::new(CollectingSink::new());
        window.set_next_processor(Some(sink.clone()));
        (clock, window, sink)
    }

    fn event(ts: i64, v: i32) -> EventChunk {
        let mut e = StreamEvent::new(0, 1, 0).with_timestamp(ts);
        e.set_attribute(Position::on_after_window(0), Value::Int(v));
        EventChunk::single(e)
    }

    #[test]
    fn test_parameter_validation() {
        assert!(TimeBatchConfig::from_parameters(&[]).is_err());
        assert!(TimeBatchConfig::from_parameters(&[Value::from("1s")]).is_err());
        assert!(TimeBatchConfig::from_parameters(&[Value::Long(0)]).is_err());
        assert!(TimeBatchConfig::from_parameters(&[Value::Int(1), Value::Int(0), Value::Int(1)]).is_err());
        assert!(TimeBatchConfig::from_parameters(&[Value::Int(1), Value::Int(1), Value::Int(1), Value::Int(1)]).is_err());

        let c = TimeBatchConfig::from_parameters(&[Value::Long(1000), Value::Bool(true)]).unwrap();
        assert!(c.stream_current_events);
        let c = TimeBatchConfig::from_parameters(&[Value::Int(1000), Value::Long(250)]).unwrap();
        assert_eq!(c.start_time, Some(250));
        let c = TimeBatchConfig::from_parameters(&[Value::Int(10), Value::Int(3), Value::Bool(true)]).unwrap();
        assert_eq!((c.start_time, c.stream_current_events), (Some(3), true));
    }

    #[test]
    fn test_anchor_aligned_first_boundary() {
        let c = TimeBatchConfig::new(1000).with_start_time(250);
        assert_eq!(c.first_emit_time(1700), 2250);
        assert_eq!(c.first_emit_time(250), 1250);
        assert_eq!(TimeBatchConfig::new(1000).first_emit_time(1700), 2700);
    }

    #[test]
    fn test_boundaries_clamp_at_max_time() {
        let c = TimeBatchConfig::new(i64::MAX);
        assert_eq!(c.first_emit_time(5), i64::MAX);
        assert_eq!(c.next_emit_after(i64::MAX - 1, i64::MAX - 1), i64::MAX);
        let c = TimeBatchConfig::new(i64::MAX).with_start_time(i64::MIN);
        assert_eq!(c.first_emit_time(i64::MAX - 1), i64::MAX);
        // Catch-up skips every missed boundary at once
        assert_eq!(TimeBatchConfig::new(1000).next_emit_after(1000, 3500), 4000);
        assert_eq!(TimeBatchConfig::new(1000).next_emit_after(1000, 1000), 2000);
    }

    #[test]
    fn test_huge_span_holds_events() {
        let (clock, window, sink) = setup(TimeBatchConfig::new(i64::MAX), false);
        clock.set(5);
        window.process(event(5, 1)).unwrap();
        assert_eq!(window.held(), 1);
        assert_eq!(window.next_emit_time(), Some(i64::MAX));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_batch_emitted_on_timer() {
        let (clock, window, sink) = setup(TimeBatchConfig::new(1000), false);
        window.process(event(0, 1)).unwrap();
        clock.set(500);
        window.process(event(500, 2)).unwrap();
        assert!(sink.is_empty());
        assert_eq!(window.next_emit_time(), Some(1000));

        clock.set(1000);
        assert_eq!(window.ctx.scheduler().fire_due(), 1);
        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::Reset, EventKind::Current, EventKind::Current]);
        assert_eq!(sink.chunks(), vec![(3, true)]);
        assert_eq!(window.next_emit_time(), Some(2000));
    }

    #[test]
    fn test_expired_emitted_with_rewritten_timestamp() {
        let (clock, window, sink) = setup(TimeBatchConfig::new(1000), true);
        window.process(event(0, 1)).unwrap();
        clock.set(1000);
        window.process(event(1000, 2)).unwrap();
        sink.clear();
        clock.set(2100);
        window.ctx.scheduler().fire_due();

        let events = sink.events();
        assert_eq!(events[0].kind(), EventKind::Expired);
        assert_eq!(events[0].timestamp(), 2100);
        assert_eq!(events[1].kind(), EventKind::Reset);
        assert_eq!(events[2].kind(), EventKind::Current);
        assert_eq!(events[2].timestamp(), 1000);
    }

    #[test]
    fn test_stream_current_mode_forwards_immediately() {
        let (clock, window, sink) = setup(TimeBatchConfig::new(1000).streaming_current_events(), true);
        window.process(event(0, 1)).unwrap();
        assert_eq!(sink.events_of(EventKind::Current).len(), 1);
        assert_eq!(window.held(), 0);

        clock.set(1000);
        window.ctx.scheduler().fire_due();
        assert_eq!(sink.events_of(EventKind::Expired).len(), 1);
    }

    #[test]
    fn test_find_reads_retained_batch() {
        let (clock, window, _sink) = setup(TimeBatchConfig::new(1000), false);
        let cond = window
            .compile_condition(
                Arc::new(|_: &StateEvent, _: &StreamEvent| true),
                MatchingMeta {
                    candidate_state_id: 1,
                    slot_count: 2,
                },
            )
            .unwrap();
        window.process(event(0, 1)).unwrap();
        let probe = StateEvent::new(2, 0);
        assert!(window.find(&probe, &cond).unwrap().is_empty());

        clock.set(1000);
        window.ctx.scheduler().fire_due();
        let found = window.find(&probe, &cond).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, EventKind::Expired);
    }
}
