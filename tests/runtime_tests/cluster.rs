use std::sync::Arc;
use std::time::Duration;

use cortex_expressions::config::ShutdownConfig;
use cortex_expressions::runtime::FIND_OPERATIONS;
use cortex_expressions::{
    EngineConfig, ExpressionEngine, OperationRegistry, RuntimeOperation, Value, NOT_FOUND_COMMAND,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn quick_shutdown() -> EngineConfig {
    EngineConfig {
        shutdown: ShutdownConfig {
            grace_period: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_find_returns_descriptors() {
    let registry = Arc::new(OperationRegistry::new());
    let engine = ExpressionEngine::new().with_operations(registry.clone());
    let import = RuntimeOperation::builder("import")
        .env("prod")
        .context(json!({"file": "a.csv"}))
        .registry(registry.clone())
        .build();
    import.start().unwrap();

    let found = engine
        .commands()
        .execute(FIND_OPERATIONS, json!({"env": "prod"}))
        .await
        .unwrap();
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    let descriptor = &found[0];
    assert_eq!(descriptor["uuid"], import.uuid().to_string());
    assert_eq!(descriptor["_id"], import.id().to_hex());
    assert_eq!(descriptor["type"], "import");
    assert_eq!(descriptor["state"], "started");
    assert_eq!(descriptor["context"], json!({"file": "a.csv"}));
    assert!(descriptor["cancelled"].is_null());

    let none = engine
        .commands()
        .execute(FIND_OPERATIONS, json!({"env": "dev"}))
        .await
        .unwrap();
    assert_eq!(none, json!([]));
}

#[tokio::test]
async fn test_unknown_runtime_command() {
    let engine = ExpressionEngine::new();
    let err = engine
        .commands()
        .execute("runtime.operations.reboot", serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code, NOT_FOUND_COMMAND);
}

#[tokio::test]
async fn test_shutdown_drains_consumed_cursors() {
    let engine = ExpressionEngine::from_config(quick_shutdown());
    let Value::Cursor(cursor) = engine
        .evaluate_literal(&json!({"$cursor": [[1, 2]]}), Value::Null)
        .await
        .unwrap()
    else {
        panic!("expected a cursor");
    };

    let (report, items) = tokio::join!(engine.shutdown(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cursor.to_array(None).await
    });
    assert_eq!(items.unwrap().len(), 2);
    assert_eq!(report.drained, 1);
    assert_eq!(report.aborted, 0);
    assert!(engine.operations().is_empty());
}

#[tokio::test]
async fn test_shutdown_after_cursor_was_consumed() {
    let engine = ExpressionEngine::from_config(quick_shutdown());
    let Value::Cursor(cursor) = engine
        .evaluate_literal(&json!({"$cursor": [[1, 2]]}), Value::Null)
        .await
        .unwrap()
    else {
        panic!("expected a cursor");
    };
    assert_eq!(cursor.to_array(None).await.unwrap().len(), 2);

    let report = engine.shutdown().await;
    assert_eq!(report.aborted, 0);
    assert!(engine.operations().is_empty());
}

#[tokio::test]
async fn test_shutdown_aborts_open_cursors() {
    let engine = ExpressionEngine::from_config(quick_shutdown());
    let Value::Cursor(cursor) = engine
        .evaluate_literal(&json!({"$cursor": [[1, 2]]}), Value::Null)
        .await
        .unwrap()
    else {
        panic!("expected a cursor");
    };
    assert!(cursor.has_next().await.unwrap());

    let report = engine.shutdown().await;
    assert_eq!(report.aborted, 1);
    assert!(cursor.is_closed().await);
    assert!(engine.operations().is_empty());
}
