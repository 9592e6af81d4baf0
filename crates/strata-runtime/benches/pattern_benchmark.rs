//! Benchmarks for pattern correlation and windowed aggregation
//!
//! Run with: cargo bench -p strata-runtime
//!
//! Benchmark groups:
//! - every_pattern: `every A -> B[b.v > a.v]` over interleaved streams
//! - sequence: `A, B` strict sequences
//! - within: patterns bounded by `within`, exercising expiry on arrival
//! - sliding_sum: length window feeding a grouped `sum`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{AttributeType, Value};
use strata_runtime::aggregator::{AggregatorSettings, ProcessingMode};
use strata_runtime::state::StatePools;
use strata_runtime::{
    AggregationProcessor, AppContext, CollectingSink, EventChunk, ExpressionExecutor, LengthWindow,
    Position, Processor, ProcessorRef, Projection, StateEventPool, StatePlan, StreamEvent,
    StreamEventCloner, StreamEventPool,
};

const KEY: Position = Position::on_after_window(0);
const VALUE: Position = Position::on_after_window(1);

/// Generate `(stream, event)` pairs cycling through `streams`
fn generate_events(count: usize, streams: &[&'static str]) -> Vec<(&'static str, StreamEvent)> {
    (0..count)
        .map(|i| {
            let mut e = StreamEvent::new(0, 2, 0).with_timestamp(i as i64);
            e.set_attribute(KEY, Value::from(format!("key_{}", i % 10)));
            e.set_attribute(VALUE, Value::Long(((i * 7) % 100) as i64));
            (streams[i % streams.len()], e)
        })
        .collect()
}

fn pools() -> StatePools {
    StatePools::new(
        Arc::new(StateEventPool::new(2, 0, 1024)),
        StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 2, 0, 1024))),
    )
}

fn rising(e: &strata_runtime::ComplexEvent) -> bool {
    e.as_state().is_some_and(|r| {
        matches!(
            (r.attribute(0, VALUE).as_i64(), r.attribute(1, VALUE).as_i64()),
            (Some(a), Some(b)) if b > a
        )
    })
}

/// Run `events` through a freshly built plan and count matches.
fn run_plan(plan: StatePlan, events: &[(&'static str, StreamEvent)]) -> usize {
    let app = AppContext::with_system_clock("bench");
    let runtime = plan.build(pools(), &app.query("q")).expect("valid plan");
    let sink = Arc::new(CollectingSink::new());
    runtime.set_next_processor(Some(sink.clone()));
    let a = runtime.receiver("A").expect("receiver A");
    let b = runtime.receiver("B").expect("receiver B");
    for (stream, event) in events {
        let target = if *stream == "A" { &a } else { &b };
        target
            .process(EventChunk::single(black_box(event.clone())))
            .expect("process");
    }
    sink.len()
}

fn bench_every_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("every_pattern");

    for size in [100, 1000, 10000].iter() {
        let events = generate_events(*size, &["A", "B", "B"]);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("strata", size), size, |b, _| {
            b.iter(|| {
                run_plan(
                    StatePlan::pattern().then("A").then_where("B", rising).every(0, 0),
                    &events,
                )
            })
        });
    }

    group.finish();
}

fn bench_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence");

    for size in [100, 1000, 10000].iter() {
        let events = generate_events(*size, &["A", "B"]);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("strata", size), size, |b, _| {
            b.iter(|| run_plan(StatePlan::sequence().then("A").then("B").every(0, 0), &events))
        });
    }

    group.finish();
}

fn bench_within(c: &mut Criterion) {
    let mut group = c.benchmark_group("within");

    for window in [10, 100, 1000].iter() {
        let events = generate_events(5000, &["A", "A", "A", "B"]);
        group.bench_with_input(BenchmarkId::new("within_ms", window), window, |b, &w| {
            b.iter(|| {
                run_plan(
                    StatePlan::pattern()
                        .then("A")
                        .then_where("B", rising)
                        .every(0, 0)
                        .within(w),
                    &events,
                )
            })
        });
    }

    group.finish();
}

fn bench_sliding_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("sliding_sum");

    for length in [10, 100, 1000].iter() {
        let events = generate_events(10000, &["S"]);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::new("length", length), length, |b, &length| {
            b.iter(|| {
                let app = AppContext::with_system_clock("bench");
                let ctx = app.query("q");
                let cloner = StreamEventCloner::new(Arc::new(StreamEventPool::with_sizes(0, 2, 0, 1024)));
                let window: ProcessorRef = LengthWindow::new(length, cloner, &ctx);
                let aggregation = AggregationProcessor::new(
                    vec![Projection::aggregate(
                        "sum",
                        vec![ExpressionExecutor::variable(VALUE, AttributeType::Long)],
                    )],
                    vec![ExpressionExecutor::variable(KEY, AttributeType::String)],
                    AggregatorSettings {
                        mode: ProcessingMode::Slide,
                        output_expects_expired: false,
                    },
                    &ctx,
                )
                .expect("aggregation");
                window.set_next_processor(Some(aggregation.clone()));
                for (_, event) in &events {
                    window
                        .process(EventChunk::single(black_box(event.clone())))
                        .expect("process");
                }
                aggregation.group_count()
            })
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = bench_every_pattern, bench_sequence, bench_within, bench_sliding_sum
}
criterion_main!(benches);
