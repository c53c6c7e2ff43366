// tests/json_roundtrip.rs
//
// Property test: arbitrary JSON-serialisable argument/return values survive
// the wire envelope -> internal model conversion and a serde round trip
// with structural equality, without needing a running container. Uses
// `proptest` for structural invariants rather than example-based cases
// alone.

use proptest::prelude::*;
use sandrunner::model::{TestCase, TestCaseEnvelope};
use serde_json::Value;

/// A bounded recursive JSON value strategy: depth 3, width 4, matching the
/// shapes a submitted function's arguments/return value can actually take.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::from(n)),
        ".*".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec((".*", inner), 0..4).prop_map(|pairs| {
                Value::Object(pairs.into_iter().collect())
            }),
        ]
    })
}

proptest! {
    #[test]
    fn test_case_preserves_parameters_and_expected(
        params in prop::collection::vec(arb_json(), 0..4),
        expected in arb_json(),
    ) {
        let envelope = TestCaseEnvelope {
            parameters: params.clone(),
            results: vec![expected.clone()],
            id: None,
        };
        let tc = TestCase::from_envelope(0, envelope);
        prop_assert_eq!(tc.parameters, params);
        prop_assert_eq!(tc.expected, expected);
    }

    #[test]
    fn test_case_envelope_round_trips_through_json(value in arb_json()) {
        let envelope = TestCaseEnvelope {
            parameters: vec![value.clone()],
            results: vec![value.clone()],
            id: Some("rt".to_string()),
        };
        let text = serde_json::to_string(&envelope).unwrap();
        let back: TestCaseEnvelope = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(back.parameters[0].clone(), value.clone());
        prop_assert_eq!(back.results[0].clone(), value);
    }

    #[test]
    fn whitelist_union_never_inserts_empty_module_names(
        libs in prop::collection::vec("[a-zA-Z0-9_=<>\\[\\];. ]{0,12}", 0..8)
    ) {
        let mut wl = sandrunner::model::WhitelistManifest::default();
        wl.union_libraries(&libs);
        prop_assert!(wl.modules.iter().all(|m| !m.is_empty()));
    }
}
