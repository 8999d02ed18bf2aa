//! Invocation-wrapper codec behavior through the public API.

use genmcp::{json, InvocationWrapper};

#[test]
fn wrapper_round_trips_as_a_single_key_object() {
    let wrapper = InvocationWrapper {
        kind: "http".to_string(),
        config: json!({ "method": "GET", "url": "https://api/{id}" }),
    };
    let value = serde_json::to_value(&wrapper).expect("serializes");
    assert_eq!(value, json!({ "http": { "method": "GET", "url": "https://api/{id}" } }));

    let reparsed: InvocationWrapper = serde_json::from_value(value).expect("reparses");
    assert_eq!(reparsed, wrapper);
}

#[test]
fn zero_keys_is_an_error() {
    let err = serde_json::from_value::<InvocationWrapper>(json!({})).expect_err("no kind");
    assert!(err.to_string().contains("exactly one"));
}

#[test]
fn two_keys_is_an_error() {
    let err = serde_json::from_value::<InvocationWrapper>(json!({
        "http": { "url": "https://a" },
        "cli": { "command": "true" }
    }))
    .expect_err("two kinds");
    assert!(err.to_string().contains("exactly one"));
}

#[test]
fn non_object_wrappers_are_rejected() {
    let err = serde_json::from_value::<InvocationWrapper>(json!("http")).expect_err("not a map");
    assert!(err.to_string().contains("must be an object"));
}
