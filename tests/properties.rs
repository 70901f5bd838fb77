//! Property-based tests for the evaluator.
//!
//! These check laws that must hold for every input document: identity
//! round-trips, generator composition and the total order on values.

use indexmap::IndexMap;
use proptest::prelude::*;

use jqlite::{evaluate, CompiledFilter, FilterOptions, JValue, Output};

// ============================================================================
// Test Strategies
// ============================================================================

/// Strategy: arbitrary JSON documents up to a few levels deep
fn json_strategy() -> impl Strategy<Value = JValue> {
    let leaf = prop_oneof![
        Just(JValue::Null),
        any::<bool>().prop_map(JValue::Bool),
        any::<i32>().prop_map(JValue::from),
        (-1.0e6..1.0e6f64).prop_map(JValue::from),
        "[a-z ]{0,6}".prop_map(JValue::from),
    ];
    leaf.prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(JValue::from),
            prop::collection::vec(("[a-z]{0,4}", inner), 0..5)
                .prop_map(|entries| JValue::from(entries.into_iter().collect::<IndexMap<String, JValue>>())),
        ]
    })
}

/// Strategy: filters that never raise, whatever the input
fn filter_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        ".",
        ".[]?",
        "..",
        "empty",
        "type",
        "length?",
        "keys?",
        "(., .)",
        "[.. | numbers]",
        "tojson",
        "[paths]",
        "select(type == \"array\")",
    ])
}

fn outputs(filter: &str, input: &JValue) -> Vec<JValue> {
    CompiledFilter::compile(filter)
        .unwrap()
        .run(input.clone())
        .collect::<Result<_, _>>()
        .unwrap()
}

// ============================================================================
// Evaluator Property Tests
// ============================================================================

proptest! {
    /// `.` yields exactly one output equal to its input, text to text.
    #[test]
    fn prop_identity_round_trip(doc in json_strategy()) {
        let json = doc.to_json_string().unwrap();
        let out = evaluate(&json, ".", &FilterOptions::default()).unwrap();
        prop_assert_eq!(out, Output::First(json));
    }

    /// `A, B` yields A's outputs followed by B's.
    #[test]
    fn prop_comma_is_concatenation(
        doc in json_strategy(),
        a in filter_strategy(),
        b in filter_strategy(),
    ) {
        let mut expected = outputs(a, &doc);
        expected.extend(outputs(b, &doc));
        prop_assert_eq!(outputs(&format!("({}), ({})", a, b), &doc), expected);
    }

    /// `A | B` runs B on each output of A in order.
    #[test]
    fn prop_pipe_is_flat_map(
        doc in json_strategy(),
        a in filter_strategy(),
        b in filter_strategy(),
    ) {
        let expected: Vec<JValue> = outputs(a, &doc)
            .iter()
            .flat_map(|v| outputs(b, v))
            .collect();
        prop_assert_eq!(outputs(&format!("({}) | ({})", a, b), &doc), expected);
    }

    /// Two compilations of the same text behave identically.
    #[test]
    fn prop_compilation_is_deterministic(doc in json_strategy(), a in filter_strategy()) {
        let first = CompiledFilter::compile(a).unwrap();
        let second = CompiledFilter::compile(a).unwrap();
        let lhs: Vec<_> = first.run(doc.clone()).collect::<Result<_, _>>().unwrap();
        let rhs: Vec<_> = second.run(doc).collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(lhs, rhs);
    }

    /// `<` agrees with the total order, which is antisymmetric.
    #[test]
    fn prop_total_order_is_consistent(a in json_strategy(), b in json_strategy()) {
        let pair = JValue::from(vec![a.clone(), b.clone()]);
        let less = outputs(".[0] < .[1]", &pair);
        prop_assert_eq!(less, vec![JValue::Bool(a.compare(&b).is_lt())]);
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
    }

    /// `sort` output is ordered and is a permutation of its input.
    #[test]
    fn prop_sort_orders_values(items in prop::collection::vec(json_strategy(), 0..8)) {
        let sorted = outputs("sort", &JValue::from(items.clone()));
        prop_assert_eq!(sorted.len(), 1);
        let sorted = sorted[0].as_array().unwrap().clone();
        prop_assert_eq!(sorted.len(), items.len());
        for pair in sorted.windows(2) {
            prop_assert!(pair[0].compare(&pair[1]).is_le());
        }
    }
}
