//! Integration tests for pattern and sequence correlation: `within`
//! bounds, retry semantics, `every` restarts and timer-driven expiry.

use std::sync::Arc;
use strata_core::{AttributeType, Value};
use strata_runtime::state::StatePools;
use strata_runtime::{
    AppContext, AppRuntime, CollectingSink, ComplexEvent, EngineConfig, EventChunk, ManualClock,
    MetaStreamEvent, Position, Processor, ProcessorRef, StateEventPool, StatePlan, StateStreamRuntime,
    StreamEvent, StreamEventCloner, StreamEventPool,
};

const VALUE: Position = Position::on_after_window(0);

// ==========================================================================
// Helpers
// ==========================================================================

fn pools(states: usize) -> StatePools {
    StatePools::new(
        Arc::new(StateEventPool::new(states, 0, 32)),
        StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 1, 0, 32))),
    )
}

fn event(ts: i64, v: i64) -> EventChunk {
    let mut e = StreamEvent::new(0, 1, 0).with_timestamp(ts);
    e.set_attribute(VALUE, Value::Long(v));
    EventChunk::single(e)
}

/// Condition on the value of the event in `state_id`.
fn value_above(state_id: usize, min: i64) -> impl Fn(&ComplexEvent) -> bool + Send + Sync + 'static {
    move |e| {
        e.as_state()
            .and_then(|s| s.attribute(state_id, VALUE).as_i64())
            .is_some_and(|v| v > min)
    }
}

struct Machine {
    clock: Arc<ManualClock>,
    app: Arc<AppContext>,
    runtime: Arc<StateStreamRuntime>,
    a: ProcessorRef,
    b: ProcessorRef,
    sink: Arc<CollectingSink>,
}

impl Machine {
    fn build(plan: StatePlan) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let app = AppContext::new("patterns", clock.clone(), EngineConfig::default());
        let runtime = plan.build(pools(2), &app.query("q")).unwrap();
        let sink = Arc::new(CollectingSink::new());
        runtime.set_next_processor(Some(sink.clone()));
        let a = runtime.receiver("A").unwrap();
        let b = runtime.receiver("B").unwrap();
        Self {
            clock,
            app,
            runtime,
            a,
            b,
            sink,
        }
    }

    fn a(&self, ts: i64, v: i64) {
        self.clock.set(ts);
        self.a.process(event(ts, v)).unwrap();
    }

    fn b(&self, ts: i64, v: i64) {
        self.clock.set(ts);
        self.b.process(event(ts, v)).unwrap();
    }

    /// `(A timestamp, B timestamp)` of every match.
    fn matches(&self) -> Vec<(i64, i64)> {
        self.sink
            .events()
            .iter()
            .map(|e| {
                let record = e.as_state().unwrap();
                (
                    record.stream_event(0).unwrap().timestamp,
                    record.stream_event(1).unwrap().timestamp,
                )
            })
            .collect()
    }
}

// ==========================================================================
// Within
// ==========================================================================

#[test]
fn test_match_inside_within() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B").within(5000));
    m.a(0, 1);
    m.b(4000, 1);
    assert_eq!(m.matches(), vec![(0, 4000)]);
    // Output carries the completing event's time
    assert_eq!(m.sink.events()[0].timestamp(), 4000);
}

#[test]
fn test_no_match_outside_within() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B").within(5000));
    m.a(0, 1);
    m.b(6000, 1);
    assert!(m.matches().is_empty());
    assert_eq!(m.runtime.in_flight(), 0);
}

#[test]
fn test_timer_purges_stale_attempts() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B").within(5000));
    m.a(0, 1);
    assert_eq!(m.runtime.in_flight(), 1);
    assert_eq!(m.app.scheduler().next_due(), Some(5001));

    m.clock.set(5001);
    assert_eq!(m.app.scheduler().fire_due(), 1);
    assert_eq!(m.runtime.in_flight(), 0);
}

#[test]
fn test_one_purge_timer_for_many_attempts() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B").every(0, 0).within(1000));
    for ts in 0..100 {
        m.a(ts, 1);
    }
    assert_eq!(m.runtime.in_flight(), 100);
    assert_eq!(m.app.scheduler().pending(), 1);
    assert_eq!(m.runtime.armed_expiry(), Some(1001));

    // Firing purges the oldest attempt and arms the next deadline
    m.clock.set(1001);
    assert_eq!(m.app.scheduler().fire_due(), 1);
    assert_eq!(m.runtime.in_flight(), 99);
    assert_eq!(m.app.scheduler().pending(), 1);
    assert_eq!(m.app.scheduler().next_due(), Some(1002));
}

#[test]
fn test_every_scope_restarts_after_expiry() {
    let m = Machine::build(
        StatePlan::pattern()
            .then("A")
            .then("B")
            .every(0, 1)
            .within(1000),
    );
    m.a(0, 1);
    m.b(2000, 1);
    assert!(m.matches().is_empty());
    // The expired attempt went back to the start of the scope
    m.a(3000, 2);
    m.b(3500, 2);
    assert_eq!(m.matches(), vec![(3000, 3500)]);
}

// ==========================================================================
// Pattern versus sequence
// ==========================================================================

#[test]
fn test_pattern_retries_after_failed_condition() {
    let m = Machine::build(StatePlan::pattern().then("A").then_where("B", value_above(1, 10)));
    m.a(1, 0);
    m.b(2, 5);
    m.b(3, 20);
    assert_eq!(m.matches(), vec![(1, 3)]);
}

#[test]
fn test_sequence_drops_attempt_after_failed_condition() {
    let m = Machine::build(StatePlan::sequence().then("A").then_where("B", value_above(1, 10)));
    m.a(1, 0);
    m.b(2, 5);
    m.b(3, 20);
    assert!(m.matches().is_empty());
    // The machine restarts and matches a fresh attempt
    m.a(4, 0);
    m.b(5, 11);
    assert_eq!(m.matches(), vec![(4, 5)]);
}

// ==========================================================================
// Every
// ==========================================================================

#[test]
fn test_without_every_only_first_start_matches() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B"));
    m.a(1, 0);
    m.a(2, 0);
    m.b(3, 0);
    m.b(4, 0);
    assert_eq!(m.matches(), vec![(1, 3)]);
}

#[test]
fn test_every_start_forks_an_attempt_per_arrival() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B").every(0, 0));
    m.a(1, 0);
    m.a(2, 0);
    m.b(3, 0);
    assert_eq!(m.matches(), vec![(1, 3), (2, 3)]);
    // Both attempts completed
    m.b(4, 0);
    assert_eq!(m.matches().len(), 2);
}

#[test]
fn test_every_sequence_keeps_only_latest_start() {
    let m = Machine::build(StatePlan::sequence().then("A").then("B").every(0, 0));
    m.a(1, 0);
    m.a(2, 0);
    m.b(3, 0);
    assert_eq!(m.matches(), vec![(2, 3)]);
}

#[test]
fn test_partitioned_runtimes_are_independent() {
    let m = Machine::build(StatePlan::pattern().then("A").then("B"));
    let clone = m.runtime.clone_runtime("k1");
    let sink = Arc::new(CollectingSink::new());
    clone.set_next_processor(Some(sink.clone()));

    m.a(1, 0);
    clone.receiver("B").unwrap().process(event(2, 0)).unwrap();
    assert!(sink.is_empty());
    assert_eq!(m.runtime.in_flight(), 1);
    assert_eq!(clone.in_flight(), 0);
}

// ==========================================================================
// Through the app runtime
// ==========================================================================

#[test]
fn test_pattern_fed_by_input_handlers() {
    let clock = Arc::new(ManualClock::new(0));
    let app = AppRuntime::with_clock("alerts", clock.clone(), EngineConfig::default()).unwrap();
    let meta = MetaStreamEvent::on_after_window_only(&[("temp", AttributeType::Long)]);
    app.define_stream("Low", meta.clone()).unwrap();
    app.define_stream("High", meta).unwrap();

    let runtime = StatePlan::pattern()
        .then("Low")
        .then_where("High", value_above(1, 90))
        .every(0, 0)
        .within(10_000)
        .build(pools(2), &app.query("spike"))
        .unwrap();
    let sink = Arc::new(CollectingSink::new());
    runtime.set_next_processor(Some(sink.clone()));
    app.subscribe("Low", "spike", runtime.receiver("Low").unwrap()).unwrap();
    app.subscribe("High", "spike", runtime.receiver("High").unwrap()).unwrap();

    let low = app.input_handler("Low").unwrap();
    let high = app.input_handler("High").unwrap();
    low.send(1_000, &[Value::Long(10)]).unwrap();
    high.send(2_000, &[Value::Long(50)]).unwrap();
    high.send(3_000, &[Value::Long(95)]).unwrap();
    high.send(4_000, &[Value::Long(99)]).unwrap();
    assert_eq!(sink.len(), 1);

    assert_eq!(app.remove_query("spike"), 2);
    low.send(5_000, &[Value::Long(10)]).unwrap();
    high.send(6_000, &[Value::Long(99)]).unwrap();
    assert_eq!(sink.len(), 1);
}
