//! Property-based tests for the incremental aggregators.
//!
//! Covers: add/remove inverse laws, sliding-window equivalence with direct
//! recomputation, and the destroyable state after full removal.

use std::collections::BTreeSet;

use proptest::prelude::*;
use strata_core::{AttributeType, Value};
use strata_runtime::aggregator::{create_aggregator, AggregatorSettings, ProcessingMode};

fn sliding() -> AggregatorSettings {
    AggregatorSettings {
        mode: ProcessingMode::Slide,
        output_expects_expired: false,
    }
}

/// A list of values and a permutation of it.
fn values_and_shuffle() -> impl Strategy<Value = (Vec<i64>, Vec<i64>)> {
    prop::collection::vec(any::<i64>(), 1..40)
        .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
}

fn small_sets() -> impl Strategy<Value = Vec<BTreeSet<i32>>> {
    prop::collection::vec(prop::collection::btree_set(0..8i32, 0..4), 1..12)
}

fn as_set(items: &BTreeSet<i32>) -> Value {
    Value::Set(items.iter().map(|i| Value::Int(*i)).collect())
}

proptest! {
    /// Removing every added value, in any order, returns sum to its empty
    /// value even when intermediate sums wrap.
    #[test]
    fn sum_remove_is_inverse_of_add((added, removal_order) in values_and_shuffle()) {
        let mut sum = create_aggregator("sum", &[AttributeType::Long], sliding()).unwrap();
        for v in &added {
            sum.process_add(&Value::Long(*v)).unwrap();
        }
        let mut last = Value::Null;
        for v in &removal_order {
            last = sum.process_remove(&Value::Long(*v)).unwrap();
        }
        prop_assert_eq!(last, Value::Null);
        prop_assert!(sum.can_destroy());
    }

    /// A sliding sum maintained incrementally matches recomputing the window.
    #[test]
    fn sliding_sum_matches_recomputation(
        values in prop::collection::vec(-1_000_000i64..1_000_000, 1..60),
        length in 1usize..8,
    ) {
        let mut sum = create_aggregator("sum", &[AttributeType::Long], sliding()).unwrap();
        for (i, v) in values.iter().enumerate() {
            if i >= length {
                sum.process_remove(&Value::Long(values[i - length])).unwrap();
            }
            let current = sum.process_add(&Value::Long(*v)).unwrap();
            let start = (i + 1).saturating_sub(length);
            let expected: i64 = values[start..=i].iter().sum();
            prop_assert_eq!(current, Value::Long(expected));
        }
    }

    /// Count equals additions minus removals.
    #[test]
    fn count_tracks_net_additions(adds in 0u32..50, removes in 0u32..50) {
        let removes = removes.min(adds);
        let mut count = create_aggregator("count", &[], sliding()).unwrap();
        for _ in 0..adds {
            count.process_add(&Value::Null).unwrap();
        }
        let mut last = Value::Long(i64::from(adds));
        for _ in 0..removes {
            last = count.process_remove(&Value::Null).unwrap();
        }
        prop_assert_eq!(last, Value::Long(i64::from(adds - removes)));
        prop_assert_eq!(count.can_destroy(), adds == removes);
    }

    /// Distinct count equals the number of distinct live values and drops to
    /// zero once everything is removed.
    #[test]
    fn distinct_count_matches_distinct_values((added, removal_order) in values_and_shuffle()) {
        let mut distinct = create_aggregator("distinctCount", &[AttributeType::Long], sliding()).unwrap();
        let mut result = Value::Null;
        for v in &added {
            result = distinct.process_add(&Value::Long(*v)).unwrap();
        }
        let unique: BTreeSet<i64> = added.iter().copied().collect();
        prop_assert_eq!(result.clone(), Value::Long(unique.len() as i64));
        for v in &removal_order {
            result = distinct.process_remove(&Value::Long(*v)).unwrap();
        }
        prop_assert_eq!(result, Value::Long(0));
        prop_assert!(distinct.can_destroy());
    }

    /// Average of small integers equals the arithmetic mean.
    #[test]
    fn avg_is_the_mean(values in prop::collection::vec(-1000i64..1000, 1..40)) {
        let mut avg = create_aggregator("avg", &[AttributeType::Long], sliding()).unwrap();
        let mut result = Value::Null;
        for v in &values {
            result = avg.process_add(&Value::Long(*v)).unwrap();
        }
        let mean = values.iter().sum::<i64>() as f64 / values.len() as f64;
        let got = result.as_f64().unwrap();
        prop_assert!((got - mean).abs() < 1e-9, "expected {mean}, got {got}");
    }

    /// After removing a prefix of the inputs, the union holds exactly the
    /// members of the remaining inputs.
    #[test]
    fn union_set_keeps_members_of_live_inputs(sets in small_sets(), removed in 0usize..12) {
        let removed = removed.min(sets.len());
        let mut union = create_aggregator("unionSet", &[AttributeType::Object], sliding()).unwrap();
        let mut result = Value::Null;
        for s in &sets {
            result = union.process_add(&as_set(s)).unwrap();
        }
        for s in &sets[..removed] {
            result = union.process_remove(&as_set(s)).unwrap();
        }
        let expected: BTreeSet<i32> = sets[removed..].iter().flatten().copied().collect();
        prop_assert_eq!(result, as_set(&expected));
    }
}
