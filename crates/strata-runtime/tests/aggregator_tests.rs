//! Integration tests for the incremental aggregators and their factory.

use std::collections::BTreeSet;
use strata_core::{AttributeType, Value};
use strata_runtime::aggregator::{
    create_aggregator, AggregatorSettings, AttributeAggregatorExecutor, ProcessingMode,
};
use strata_runtime::{ComplexEvent, EngineError, EventKind, ExpressionExecutor, Position, StreamEvent};

const VALUE: Position = Position::on_after_window(0);

// ==========================================================================
// Helpers
// ==========================================================================

fn sliding() -> AggregatorSettings {
    AggregatorSettings {
        mode: ProcessingMode::Slide,
        output_expects_expired: false,
    }
}

fn record(kind: EventKind, value: Value) -> ComplexEvent {
    let mut e = StreamEvent::new(0, 1, 0).with_kind(kind);
    e.set_attribute(VALUE, value);
    e.into()
}

fn set(items: &[&str]) -> Value {
    Value::Set(items.iter().map(|s| Value::from(*s)).collect::<BTreeSet<_>>())
}

// ==========================================================================
// Factory validation
// ==========================================================================

#[test]
fn test_factory_rejects_bad_arguments() {
    let settings = AggregatorSettings::default();
    assert!(create_aggregator("sum", &[AttributeType::String], settings).is_err());
    assert!(create_aggregator("sum", &[], settings).is_err());
    assert!(create_aggregator("avg", &[AttributeType::Bool], settings).is_err());
    assert!(create_aggregator("and", &[AttributeType::Int], settings).is_err());
    assert!(create_aggregator("unionSet", &[AttributeType::String], settings).is_err());
    assert!(create_aggregator("count", &[AttributeType::Int, AttributeType::Int], settings).is_err());
    assert!(matches!(
        create_aggregator("median", &[AttributeType::Double], settings),
        Err(EngineError::Validation { .. })
    ));
}

#[test]
fn test_factory_return_types() {
    let settings = AggregatorSettings::default();
    let cases = [
        ("count", vec![], AttributeType::Long),
        ("sum", vec![AttributeType::Int], AttributeType::Long),
        ("sum", vec![AttributeType::Float], AttributeType::Double),
        ("avg", vec![AttributeType::Long], AttributeType::Double),
        ("distinctCount", vec![AttributeType::String], AttributeType::Long),
        ("and", vec![AttributeType::Bool], AttributeType::Bool),
        ("unionSet", vec![AttributeType::Object], AttributeType::Object),
    ];
    for (name, args, expected) in cases {
        let aggregator = create_aggregator(name, &args, settings).unwrap();
        assert_eq!(aggregator.return_type(), expected, "{name}");
    }
}

// ==========================================================================
// Executor dispatch by record kind
// ==========================================================================

#[test]
fn test_executor_follows_record_kinds() {
    let mut sum = AttributeAggregatorExecutor::new(
        "sum",
        vec![ExpressionExecutor::variable(VALUE, AttributeType::Long)],
        sliding(),
    )
    .unwrap();

    assert_eq!(sum.execute(&record(EventKind::Current, Value::Long(4))).unwrap(), Value::Long(4));
    assert_eq!(sum.execute(&record(EventKind::Current, Value::Long(6))).unwrap(), Value::Long(10));
    assert_eq!(sum.execute(&record(EventKind::Expired, Value::Long(4))).unwrap(), Value::Long(6));
    assert_eq!(sum.execute(&record(EventKind::Reset, Value::Null)).unwrap(), Value::Null);
    assert!(sum.can_destroy());
    assert!(sum
        .execute(&ComplexEvent::from(StreamEvent::timer(1)))
        .is_err());
}

#[test]
fn test_executor_state_survives_restore() {
    let args = || vec![ExpressionExecutor::variable(VALUE, AttributeType::String)];
    let mut distinct = AttributeAggregatorExecutor::new("distinctCount", args(), sliding()).unwrap();
    for v in ["a", "b", "a"] {
        distinct.execute(&record(EventKind::Current, Value::from(v))).unwrap();
    }
    let state = distinct.current_state().unwrap();

    let mut restored = distinct.clone_empty();
    assert!(restored.can_destroy());
    restored.restore_state(&state).unwrap();
    assert_eq!(
        restored.execute(&record(EventKind::Expired, Value::from("a"))).unwrap(),
        Value::Long(2)
    );
    assert_eq!(
        restored.execute(&record(EventKind::Expired, Value::from("a"))).unwrap(),
        Value::Long(1)
    );
}

// ==========================================================================
// Individual aggregators
// ==========================================================================

#[test]
fn test_count_removal_below_zero_is_a_violation() {
    let mut count = create_aggregator("count", &[], sliding()).unwrap();
    assert_eq!(count.process_add(&Value::Null).unwrap(), Value::Long(1));
    assert_eq!(count.process_remove(&Value::Null).unwrap(), Value::Long(0));
    assert!(matches!(
        count.process_remove(&Value::Null),
        Err(EngineError::StateViolation { .. })
    ));
}

#[test]
fn test_avg_over_a_sliding_window() {
    let mut avg = create_aggregator("avg", &[AttributeType::Double], sliding()).unwrap();
    avg.process_add(&Value::Double(1.0)).unwrap();
    avg.process_add(&Value::Double(2.0)).unwrap();
    assert_eq!(avg.process_add(&Value::Double(6.0)).unwrap(), Value::Double(3.0));
    assert_eq!(avg.process_remove(&Value::Double(1.0)).unwrap(), Value::Double(4.0));
}

#[test]
fn test_and_tracks_false_inputs() {
    let mut and = create_aggregator("and", &[AttributeType::Bool], sliding()).unwrap();
    assert_eq!(and.process_add(&Value::Bool(true)).unwrap(), Value::Bool(true));
    assert_eq!(and.process_add(&Value::Bool(false)).unwrap(), Value::Bool(false));
    assert_eq!(and.process_remove(&Value::Bool(false)).unwrap(), Value::Bool(true));
    assert_eq!(and.reset().unwrap(), Value::Bool(false));
    assert!(and.can_destroy());
}

#[test]
fn test_union_set_removes_only_unreferenced_members() {
    let mut union = create_aggregator("unionSet", &[AttributeType::Object], sliding()).unwrap();
    union.process_add(&set(&["a", "b"])).unwrap();
    assert_eq!(union.process_add(&set(&["b", "c"])).unwrap(), set(&["a", "b", "c"]));
    // "b" is still referenced by the second input
    assert_eq!(union.process_remove(&set(&["a", "b"])).unwrap(), set(&["b", "c"]));
    assert_eq!(union.process_remove(&set(&["b", "c"])).unwrap(), set(&[]));
    assert!(union.can_destroy());
}

#[test]
fn test_union_set_in_batch_mode_cannot_remove() {
    let mut union =
        create_aggregator("unionSet", &[AttributeType::Object], AggregatorSettings::default()).unwrap();
    union.process_add(&set(&["a"])).unwrap();
    assert!(union.process_remove(&set(&["a"])).is_err());
    assert_eq!(union.reset().unwrap(), set(&[]));
}
