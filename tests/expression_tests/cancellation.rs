use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_expressions::engine::EVALUATION_OPERATION;
use cortex_expressions::operator::{Api, ApiOperator, Arity};
use cortex_expressions::runtime::CANCEL_OPERATIONS;
use cortex_expressions::{ExpressionEngine, OperatorRegistry, Value};
use serde_json::json;

/// `{"$sleep": [{"ms": [50]}, ...]}` waits between commands.
struct Sleep;

#[async_trait]
impl ApiOperator for Sleep {
    fn name(&self) -> &'static str {
        "$sleep"
    }

    fn api(&self) -> Api {
        Api::builder()
            .command("ms", Arity::Fixed(1), |_, _, args| async move {
                let ms = args[0].as_f64().unwrap_or(0.0) as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::Number(ms as f64))
            })
            .build()
    }

    fn multiple_commands(&self) -> bool {
        true
    }
}

fn engine() -> ExpressionEngine {
    let mut operators = OperatorRegistry::with_defaults();
    operators.register(Arc::new(Sleep));
    ExpressionEngine::new().with_operators(operators)
}

#[tokio::test]
async fn test_cancel_stops_between_commands() {
    let engine = engine();
    let literal = json!({"$sleep": [{"ms": [40]}, {"ms": [40]}, {"ms": [40]}]});

    let (result, cancelled) = tokio::join!(engine.evaluate_literal(&literal, Value::Null), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine
            .commands()
            .execute(CANCEL_OPERATIONS, json!({"type": EVALUATION_OPERATION}))
            .await
    });

    let cancelled = cancelled.unwrap();
    assert_eq!(cancelled.as_array().unwrap().len(), 1);
    assert_eq!(cancelled[0]["type"], EVALUATION_OPERATION);

    let err = result.unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(err.path.as_deref(), Some("$sleep.1"));
    assert!(engine.operations().is_empty());
}

#[tokio::test]
async fn test_cancel_closes_returned_cursor() {
    let engine = engine();
    let value = engine
        .evaluate_literal(&json!({"$cursor": [[1, 2, 3]]}), Value::Null)
        .await
        .unwrap();
    let Value::Cursor(cursor) = value else {
        panic!("expected a cursor");
    };

    engine
        .commands()
        .execute(CANCEL_OPERATIONS, serde_json::Value::Null)
        .await
        .unwrap();
    assert!(cursor.is_closed().await);
    assert!(engine.operations().is_empty());
}
