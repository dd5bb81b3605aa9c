//! Lazy, forward-only cursors over (possibly remote) result sets.
//!
//! A cursor is created unopened around a deferred [`CursorSource`]. The first
//! `has_next`/`next`/`passthru(false)` call executes the source and starts
//! pulling items from a [`CursorProvider`], either in batches (buffered mode)
//! or one item per round trip (shared mode).
//!
//! Cursors travel through the evaluator as [`Value::Cursor`] holding a
//! [`CursorRef`], a cheap clonable handle around the single-consumer state.

pub mod memory;
pub mod provider_cursor;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::sync::{watch, Mutex};

use crate::config::CursorConfig;
use crate::error::{Fault, FaultResult};
use crate::value::Value;

pub use memory::{MemoryCursorProvider, MemorySource};
pub use provider_cursor::{CursorState, ProviderCursor, WritableCursor};

/// Response of a provider-side fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub buffer: Vec<Value>,
    pub has_more: bool,
    pub has_next: bool,
}

/// Owner of the provider-side cursor state, addressed by opaque ids.
#[async_trait]
pub trait CursorProvider: Send + Sync {
    async fn fetch(&self, id: &str, count: usize) -> FaultResult<FetchResult>;
    async fn close(&self, id: &str) -> FaultResult<()>;
    async fn has_next(&self, id: &str) -> FaultResult<bool>;
    async fn is_closed(&self, id: &str) -> FaultResult<bool>;
    async fn push(&self, id: &str, items: Vec<Value>) -> FaultResult<()>;
}

/// The deferred query behind a cursor.
#[async_trait]
pub trait CursorSource: Send + Sync {
    /// Serializable description of the query, without executing it.
    async fn describe(&self) -> FaultResult<Value>;

    /// Executes the query and returns the provider-side handle.
    async fn open(&self) -> FaultResult<String>;
}

#[async_trait]
pub trait Cursor: Send + Sync {
    async fn has_next(&mut self) -> FaultResult<bool>;

    async fn next(&mut self) -> FaultResult<Option<Value>>;

    async fn close(&mut self) -> FaultResult<()>;

    fn is_closed(&self) -> bool;

    fn is_shared(&self) -> bool;

    /// With `replay`, describes the original query; otherwise opens the
    /// cursor and describes the live handle.
    async fn passthru(&mut self, replay: bool) -> FaultResult<Value>;

    async fn push(&mut self, _items: Vec<Value>) -> FaultResult<()> {
        Err(Fault::invalid_argument("Cursor is not writable"))
    }

    async fn to_array(&mut self, limit: Option<usize>) -> FaultResult<Vec<Value>> {
        let mut items = Vec::new();
        while limit.map_or(true, |max| items.len() < max) {
            match self.next().await? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }
}

/// Shared handle to a single-consumer cursor. Every handle observes the
/// same closed flag, published after each call that may close the cursor.
#[derive(Clone)]
pub struct CursorRef {
    cursor: Arc<Mutex<Box<dyn Cursor>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl CursorRef {
    pub fn new<C: Cursor + 'static>(cursor: C) -> Self {
        let (closed, _) = watch::channel(cursor.is_closed());
        Self {
            cursor: Arc::new(Mutex::new(Box::new(cursor))),
            closed: Arc::new(closed),
        }
    }

    /// Buffered (or shared, per config) cursor over in-memory items.
    pub fn from_values(items: Vec<Value>, config: &CursorConfig) -> Self {
        let provider = Arc::new(MemoryCursorProvider::new());
        let source = Arc::new(MemorySource::new(provider.clone(), items));
        Self::new(
            ProviderCursor::new(source, provider)
                .with_batch_size(config.batch_size())
                .with_shared(config.shared),
        )
    }

    fn publish(&self, cursor: &dyn Cursor) {
        if cursor.is_closed() {
            self.closed.send_if_modified(|closed| !std::mem::replace(closed, true));
        }
    }

    pub async fn has_next(&self) -> FaultResult<bool> {
        let mut cursor = self.cursor.lock().await;
        let result = cursor.has_next().await;
        self.publish(&**cursor);
        result
    }

    pub async fn next(&self) -> FaultResult<Option<Value>> {
        let mut cursor = self.cursor.lock().await;
        let result = cursor.next().await;
        self.publish(&**cursor);
        result
    }

    pub async fn close(&self) -> FaultResult<()> {
        let mut cursor = self.cursor.lock().await;
        let result = cursor.close().await;
        self.publish(&**cursor);
        result
    }

    pub async fn is_closed(&self) -> bool {
        self.cursor.lock().await.is_closed()
    }

    /// Resolves once the cursor is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub async fn passthru(&self, replay: bool) -> FaultResult<Value> {
        let mut cursor = self.cursor.lock().await;
        let result = cursor.passthru(replay).await;
        self.publish(&**cursor);
        result
    }

    pub async fn push(&self, items: Vec<Value>) -> FaultResult<()> {
        self.cursor.lock().await.push(items).await
    }

    pub async fn to_array(&self, limit: Option<usize>) -> FaultResult<Vec<Value>> {
        let mut cursor = self.cursor.lock().await;
        let result = cursor.to_array(limit).await;
        self.publish(&**cursor);
        result
    }

    /// Pulls items one by one until the cursor is exhausted or fails.
    pub fn into_stream(self) -> impl Stream<Item = FaultResult<Value>> + Send {
        stream::unfold(Some(self), |cursor| async move {
            let cursor = cursor?;
            match cursor.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    pub fn ptr_eq(&self, other: &CursorRef) -> bool {
        Arc::ptr_eq(&self.cursor, &other.cursor)
    }
}

impl PartialEq for CursorRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for CursorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CursorRef({:p})", Arc::as_ptr(&self.cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn numbers(n: usize) -> Vec<Value> {
        (0..n).map(|i| Value::Number(i as f64)).collect()
    }

    #[tokio::test]
    async fn test_cursor_ref_to_array() {
        let cursor = CursorRef::from_values(numbers(3), &CursorConfig::default());
        let items = cursor.to_array(None).await.unwrap();
        assert_eq!(items, numbers(3));
        assert!(cursor.is_closed().await);
    }

    #[tokio::test]
    async fn test_cursor_ref_limit() {
        let cursor = CursorRef::from_values(numbers(5), &CursorConfig::default());
        assert_eq!(cursor.to_array(Some(2)).await.unwrap(), numbers(2));
        assert!(cursor.has_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_cursor_stream() {
        let cursor = CursorRef::from_values(numbers(4), &CursorConfig::default());
        let collected: Vec<_> = cursor.into_stream().collect().await;
        assert_eq!(collected.len(), 4);
        assert!(collected.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_read_only_cursor_rejects_push() {
        let cursor = CursorRef::from_values(numbers(1), &CursorConfig::default());
        assert!(cursor.push(numbers(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_resolves_on_exhaustion() {
        let cursor = CursorRef::from_values(numbers(2), &CursorConfig::default());
        let waiter = {
            let cursor = cursor.clone();
            tokio::spawn(async move { cursor.closed().await })
        };
        assert_eq!(cursor.to_array(None).await.unwrap().len(), 2);
        tokio::time::timeout(std::time::Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_cursor_ref_identity() {
        let a = CursorRef::from_values(vec![], &CursorConfig::default());
        let b = a.clone();
        let c = CursorRef::from_values(vec![], &CursorConfig::default());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
