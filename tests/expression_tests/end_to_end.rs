use cortex_expressions::{
    AccessContext, ExpressionEngine, Value, INVALID_QUERY, INVALID_UNKNOWN_COMMAND,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_echo_hello() {
    let engine = ExpressionEngine::new();
    let value = engine
        .evaluate_literal(&json!({"$echo": ["hello"]}), Value::Null)
        .await
        .unwrap();
    assert_eq!(value, Value::from("hello"));
}

#[tokio::test]
async fn test_random_differs_within_a_pass() {
    let engine = ExpressionEngine::new();
    let value = engine
        .evaluate_literal(&json!(["$$RANDOM", "$$RANDOM"]), Value::Null)
        .await
        .unwrap();
    let numbers: Vec<f64> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert!(numbers.iter().all(|n| (0.0..1.0).contains(n)));
    assert_ne!(numbers[0], numbers[1]);
}

#[tokio::test]
async fn test_moment_add_day() {
    let engine = ExpressionEngine::new();
    let value = engine
        .evaluate_literal(
            &json!({"$moment": ["2020-01-01", {"add": [1, "day"]}, {"toISOString": []}]}),
            Value::Null,
        )
        .await
        .unwrap();
    assert_eq!(value, Value::from("2020-01-02T00:00:00.000Z"));
}

#[tokio::test]
async fn test_now_is_stable_per_pass() {
    let engine = ExpressionEngine::new();
    let root = engine.parse(&json!(["$$NOW", {"$echo": ["$$NOW"]}])).unwrap();

    let first = engine
        .evaluate(&root, AccessContext::default(), Value::Null, std::iter::empty())
        .await
        .unwrap();
    let items = first.as_array().unwrap();
    assert!(matches!(items[0], Value::Date(_)));
    assert_eq!(items[0], items[1]);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = engine
        .evaluate(&root, AccessContext::default(), Value::Null, std::iter::empty())
        .await
        .unwrap();
    assert_ne!(items[0], second.as_array().unwrap()[0]);
}

#[test]
fn test_multi_key_command_entry_fails() {
    let engine = ExpressionEngine::new();
    let err = engine
        .parse(&json!({"$echo": ["a"], "$http": []}))
        .unwrap_err();
    assert_eq!(err.code, INVALID_QUERY);

    let err = engine
        .parse(&json!({"$moment": ["2020-01-01", {"add": [1, "day"], "subtract": [1, "day"]}]}))
        .unwrap_err();
    assert_eq!(err.code, INVALID_QUERY);
    assert_eq!(err.path.as_deref(), Some("$moment.1"));
}

#[test]
fn test_single_command_operators() {
    let engine = ExpressionEngine::new();
    assert!(engine
        .parse(&json!({"$http": [{"get": ["https://example.com"]}]}))
        .is_ok());

    let err = engine
        .parse(&json!({"$http": [{"get": ["https://a"]}, {"get": ["https://b"]}]}))
        .unwrap_err();
    assert_eq!(err.code, INVALID_QUERY);
    assert!(err.reason.contains("$http"));
    assert_eq!(err.path.as_deref(), Some("$http.1"));
}

#[test]
fn test_unknown_command_points_at_index() {
    let engine = ExpressionEngine::new();
    let err = engine
        .parse(&json!({"$moment": ["2020-01-01", "add", "frobnicate"]}))
        .unwrap_err();
    assert_eq!(err.code, INVALID_UNKNOWN_COMMAND);
    assert_eq!(err.path.as_deref(), Some("$moment.2"));
}

#[tokio::test]
async fn test_request_context_and_let() {
    let engine = ExpressionEngine::new();
    let root = engine
        .parse(&json!({"$let": {
            "vars": {"user": "$$REQUEST.user", "doc": "$$ROOT"},
            "in": {"who": "$$user", "total": "$$doc.total", "locale": {"$intl": [{"getCanonicalLocales": []}]}}
        }}))
        .unwrap();
    let ac: AccessContext = serde_json::from_value(json!({
        "req": {"user": "ann"},
        "locale": "de_DE"
    }))
    .unwrap();

    let value = engine
        .evaluate(
            &root,
            ac,
            Value::from(json!({"total": 12})),
            std::iter::empty(),
        )
        .await
        .unwrap();
    assert_eq!(
        value.to_json(),
        json!({"who": "ann", "total": 12, "locale": ["de-DE"]})
    );
}
