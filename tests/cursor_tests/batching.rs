use std::sync::Arc;

use cortex_expressions::config::CursorConfig;
use cortex_expressions::cursor::{MemoryCursorProvider, MemorySource, ProviderCursor};
use cortex_expressions::{CursorRef, Value};
use futures::StreamExt;
use pretty_assertions::assert_eq;

fn numbers(n: usize) -> Vec<Value> {
    (0..n).map(|i| Value::Number(i as f64)).collect()
}

fn cursor(items: Vec<Value>, batch_size: usize, shared: bool) -> CursorRef {
    let provider = Arc::new(MemoryCursorProvider::new());
    let source = Arc::new(MemorySource::new(provider.clone(), items));
    CursorRef::new(
        ProviderCursor::new(source, provider)
            .with_batch_size(batch_size)
            .with_shared(shared),
    )
}

#[tokio::test]
async fn test_buffered_cursor_yields_every_item() {
    let cursor = cursor(numbers(5), 2, false);
    let mut seen = Vec::new();
    while let Some(item) = cursor.next().await.unwrap() {
        seen.push(item);
    }
    assert_eq!(seen, numbers(5));
    assert!(!cursor.has_next().await.unwrap());
    assert!(cursor.is_closed().await);
}

#[tokio::test]
async fn test_shared_cursor_closes_with_last_item() {
    let cursor = cursor(numbers(3), 100, true);
    for expected in numbers(3) {
        assert!(!cursor.is_closed().await);
        assert_eq!(cursor.next().await.unwrap(), Some(expected));
    }
    assert!(cursor.is_closed().await);
    assert_eq!(cursor.next().await.unwrap(), None);
}

#[tokio::test]
async fn test_config_driven_cursor_as_stream() {
    let config = CursorConfig {
        default_batch_size: 2,
        shared: false,
    };
    let items: Vec<Value> = CursorRef::from_values(numbers(5), &config)
        .into_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(items, numbers(5));
}

#[tokio::test]
async fn test_passthru_describes_source() {
    let cursor = cursor(numbers(2), 10, false);
    let replay = cursor.passthru(true).await.unwrap();
    assert!(!cursor.is_closed().await);

    let live = cursor.passthru(false).await.unwrap();
    assert_eq!(live.as_object().unwrap()["object"], Value::from("cursor"));
    assert_ne!(replay, live);
}
