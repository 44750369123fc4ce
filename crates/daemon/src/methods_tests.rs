// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn square() -> Arc<dyn WorkerMethod> {
    method_fn(|args: Value| {
        let x = args["x"].as_i64().ok_or_else(|| MethodError::BadArgs {
            method: "square".to_string(),
            message: "x must be an integer".to_string(),
        })?;
        Ok(json!(x * x))
    })
}

#[test]
fn registered_method_is_invoked() {
    let mut registry = MethodRegistry::new();
    registry.register("square", square());

    assert!(registry.contains("square"));
    assert_eq!(registry.invoke("square", json!({"x": 3})).unwrap(), json!(9));
}

#[test]
fn unknown_method_is_rejected() {
    let registry = MethodRegistry::new();
    assert_eq!(
        registry.invoke("resize", json!({})),
        Err(MethodError::Unknown("resize".to_string()))
    );
}

#[test]
fn method_errors_pass_through() {
    let mut registry = MethodRegistry::new();
    registry.register("square", square());

    let err = registry.invoke("square", json!({"x": "three"})).unwrap_err();
    assert!(matches!(err, MethodError::BadArgs { .. }));
}

#[test]
fn registration_replaces_earlier_handler() {
    let mut registry = MethodRegistry::new();
    registry.register("op", method_fn(|_| Ok(json!("first"))));
    registry.register("op", method_fn(|_| Ok(json!("second"))));

    assert_eq!(registry.invoke("op", json!(null)).unwrap(), json!("second"));
    assert_eq!(registry.names(), vec!["op"]);
}

#[test]
fn names_are_sorted() {
    let mut registry = MethodRegistry::new();
    registry.register("resize", method_fn(|_| Ok(json!(null))));
    registry.register("execute", method_fn(|_| Ok(json!(null))));

    assert_eq!(registry.names(), vec!["execute", "resize"]);
    assert!(!registry.is_empty());
}

#[test]
fn registry_clones_share_handlers() {
    let mut registry = MethodRegistry::new();
    registry.register(EXECUTE_METHOD, square());

    let clone = registry.clone();
    assert_eq!(
        clone.invoke(EXECUTE_METHOD, json!({"x": 4})).unwrap(),
        json!(16)
    );
}
