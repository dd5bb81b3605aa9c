use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{Cursor, CursorProvider, CursorSource};
use crate::config::{clamp_batch_size, MAX_BATCH_SIZE};
use crate::error::{Fault, FaultResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CursorState {
    Unopened,
    Opened,
    Closed,
}

/// Cursor backed by a [`CursorProvider`].
///
/// Buffered mode prefetches `batch_size` items on open and refills whenever
/// the local buffer drains. A fetch returning fewer items than requested
/// means the provider is exhausted and its handle is closed right away,
/// unless the cursor is writable: then the handle stays open until the local
/// buffer runs dry so pushes can still land.
///
/// Shared mode keeps no local buffer: every `next`/`has_next` is a single
/// item round trip, so writes made to the provider between reads are seen.
pub struct ProviderCursor {
    source: Arc<dyn CursorSource>,
    provider: Arc<dyn CursorProvider>,
    id: Option<String>,
    state: CursorState,
    buffer: VecDeque<Value>,
    batch_size: usize,
    shared: bool,
    has_more: bool,
    keep_open: bool,
}

impl ProviderCursor {
    pub fn new(source: Arc<dyn CursorSource>, provider: Arc<dyn CursorProvider>) -> Self {
        Self {
            source,
            provider,
            id: None,
            state: CursorState::Unopened,
            buffer: VecDeque::new(),
            batch_size: MAX_BATCH_SIZE,
            shared: false,
            has_more: false,
            keep_open: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = clamp_batch_size(batch_size);
        self
    }

    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether the last provider response reported more items. Kept after
    /// close in shared mode.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[instrument(skip(self), level = "debug")]
    async fn ensure_open(&mut self) -> FaultResult<()> {
        if self.state != CursorState::Unopened {
            return Ok(());
        }
        let id = self.source.open().await?;
        debug!("cursor opened: {} (shared: {})", id, self.shared);
        self.id = Some(id);
        self.state = CursorState::Opened;
        self.has_more = true;
        if !self.shared {
            self.fill().await?;
        }
        Ok(())
    }

    fn opened_id(&self) -> FaultResult<String> {
        self.id
            .clone()
            .ok_or_else(|| Fault::internal("Cursor has no provider handle"))
    }

    async fn fill(&mut self) -> FaultResult<()> {
        let id = self.opened_id()?;
        let result = self.provider.fetch(&id, self.batch_size).await?;
        let received = result.buffer.len();
        self.buffer.extend(result.buffer);
        self.has_more = result.has_more && received >= self.batch_size;
        if !self.has_more && !self.keep_open {
            self.provider.close(&id).await?;
        }
        Ok(())
    }

    async fn has_next_buffered(&mut self) -> FaultResult<bool> {
        loop {
            if !self.buffer.is_empty() {
                return Ok(true);
            }
            if !self.has_more {
                self.close().await?;
                return Ok(false);
            }
            self.fill().await?;
        }
    }

    async fn has_next_shared(&mut self) -> FaultResult<bool> {
        let id = self.opened_id()?;
        let more = self.provider.has_next(&id).await?;
        if !more {
            self.close().await?;
        }
        Ok(more)
    }

    async fn next_shared(&mut self) -> FaultResult<Option<Value>> {
        let id = self.opened_id()?;
        let result = self.provider.fetch(&id, 1).await?;
        self.has_more = result.has_more;
        let item = result.buffer.into_iter().next();
        if !self.has_more || item.is_none() {
            self.close().await?;
        }
        Ok(item)
    }

    fn describe_handle(&self) -> Value {
        Value::object([
            ("object", Value::from("cursor")),
            (
                "_id",
                self.id.clone().map(Value::String).unwrap_or(Value::Null),
            ),
            ("shared", Value::Boolean(self.shared)),
            ("batchSize", Value::Number(self.batch_size as f64)),
            ("hasMore", Value::Boolean(self.has_more)),
            ("closed", Value::Boolean(self.state == CursorState::Closed)),
        ])
    }
}

#[async_trait]
impl Cursor for ProviderCursor {
    async fn has_next(&mut self) -> FaultResult<bool> {
        self.ensure_open().await?;
        if self.state == CursorState::Closed {
            return Ok(false);
        }
        if self.shared {
            self.has_next_shared().await
        } else {
            self.has_next_buffered().await
        }
    }

    async fn next(&mut self) -> FaultResult<Option<Value>> {
        self.ensure_open().await?;
        if self.state == CursorState::Closed {
            return Ok(None);
        }
        if self.shared {
            return self.next_shared().await;
        }
        if !self.has_next_buffered().await? {
            return Ok(None);
        }
        let item = self.buffer.pop_front();
        if self.buffer.is_empty() && !self.has_more {
            self.close().await?;
        }
        Ok(item)
    }

    async fn close(&mut self) -> FaultResult<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        if let Some(id) = &self.id {
            if !self.provider.is_closed(id).await? {
                self.provider.close(id).await?;
            }
        }
        self.state = CursorState::Closed;
        if !self.shared {
            self.buffer.clear();
            self.has_more = false;
        }
        debug!("cursor closed: {:?}", self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    async fn passthru(&mut self, replay: bool) -> FaultResult<Value> {
        if replay {
            return self.source.describe().await;
        }
        self.ensure_open().await?;
        Ok(self.describe_handle())
    }
}

/// A [`ProviderCursor`] whose content can be appended to through the
/// provider, e.g. by transform pipelines rewriting a cursor in place.
pub struct WritableCursor {
    inner: ProviderCursor,
}

impl WritableCursor {
    pub fn new(mut inner: ProviderCursor) -> Self {
        inner.keep_open = true;
        Self { inner }
    }

    pub fn inner(&self) -> &ProviderCursor {
        &self.inner
    }
}

#[async_trait]
impl Cursor for WritableCursor {
    async fn has_next(&mut self) -> FaultResult<bool> {
        self.inner.has_next().await
    }

    async fn next(&mut self) -> FaultResult<Option<Value>> {
        self.inner.next().await
    }

    async fn close(&mut self) -> FaultResult<()> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn is_shared(&self) -> bool {
        self.inner.is_shared()
    }

    async fn passthru(&mut self, replay: bool) -> FaultResult<Value> {
        self.inner.passthru(replay).await
    }

    async fn push(&mut self, items: Vec<Value>) -> FaultResult<()> {
        self.inner.ensure_open().await?;
        if self.inner.is_closed() {
            return Err(Fault::invalid_argument("Cannot push to a closed cursor"));
        }
        let id = self.inner.opened_id()?;
        self.inner.provider.push(&id, items).await?;
        self.inner.has_more = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{FetchResult, MemoryCursorProvider, MemorySource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn numbers(n: usize) -> Vec<Value> {
        (0..n).map(|i| Value::Number(i as f64)).collect()
    }

    fn memory_cursor(items: Vec<Value>) -> (ProviderCursor, Arc<MemoryCursorProvider>) {
        let provider = Arc::new(MemoryCursorProvider::new());
        let source = Arc::new(MemorySource::new(provider.clone(), items));
        (ProviderCursor::new(source, provider.clone()), provider)
    }

    /// Counts provider round trips around a memory provider.
    struct CountingProvider {
        inner: MemoryCursorProvider,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl CursorProvider for CountingProvider {
        async fn fetch(&self, id: &str, count: usize) -> FaultResult<FetchResult> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(id, count).await
        }
        async fn close(&self, id: &str) -> FaultResult<()> {
            self.inner.close(id).await
        }
        async fn has_next(&self, id: &str) -> FaultResult<bool> {
            self.inner.has_next(id).await
        }
        async fn is_closed(&self, id: &str) -> FaultResult<bool> {
            self.inner.is_closed(id).await
        }
        async fn push(&self, id: &str, items: Vec<Value>) -> FaultResult<()> {
            self.inner.push(id, items).await
        }
    }

    struct CountingSource {
        provider: Arc<CountingProvider>,
        items: Vec<Value>,
    }

    #[async_trait]
    impl CursorSource for CountingSource {
        async fn describe(&self) -> FaultResult<Value> {
            Ok(Value::from("counting"))
        }
        async fn open(&self) -> FaultResult<String> {
            Ok(self.provider.inner.insert(self.items.clone()))
        }
    }

    fn counting_cursor(items: Vec<Value>) -> (ProviderCursor, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            inner: MemoryCursorProvider::new(),
            fetches: AtomicUsize::new(0),
        });
        let source = Arc::new(CountingSource {
            provider: provider.clone(),
            items,
        });
        (ProviderCursor::new(source, provider.clone()), provider)
    }

    #[tokio::test]
    async fn test_opens_lazily() {
        let (mut cursor, provider) = memory_cursor(numbers(2));
        assert_eq!(cursor.state(), CursorState::Unopened);
        assert_eq!(provider.open_count(), 0);
        assert!(cursor.has_next().await.unwrap());
        assert_eq!(cursor.state(), CursorState::Opened);
    }

    #[tokio::test]
    async fn test_buffered_batches() {
        let (cursor, provider) = counting_cursor(numbers(5));
        let mut cursor = cursor.with_batch_size(2);

        let mut seen = Vec::new();
        while let Some(item) = cursor.next().await.unwrap() {
            seen.push(item);
        }
        assert_eq!(seen, numbers(5));
        assert!(!cursor.has_next().await.unwrap());
        assert!(cursor.is_closed());
        // 2 + 2 + 1
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(provider.inner.open_count(), 0);
    }

    #[tokio::test]
    async fn test_short_fetch_closes_provider_handle() {
        let (cursor, provider) = memory_cursor(numbers(3));
        let mut cursor = cursor.with_batch_size(10);
        assert!(cursor.has_next().await.unwrap());
        // everything is buffered locally, the provider handle is already gone
        assert_eq!(provider.open_count(), 0);
        assert_eq!(cursor.buffered(), 3);
        assert!(!cursor.has_more());
    }

    #[tokio::test]
    async fn test_batch_size_is_clamped() {
        let (cursor, _) = memory_cursor(vec![]);
        assert_eq!(cursor.with_batch_size(0).batch_size(), 1);
        let (cursor, _) = memory_cursor(vec![]);
        assert_eq!(cursor.with_batch_size(500).batch_size(), 100);
    }

    #[tokio::test]
    async fn test_shared_round_trips_one_item() {
        let (cursor, provider) = counting_cursor(numbers(3));
        let mut cursor = cursor.with_shared(true).with_batch_size(50);

        assert_eq!(cursor.next().await.unwrap(), Some(Value::Number(0.0)));
        assert!(!cursor.is_closed());
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Number(1.0)));
        assert!(!cursor.is_closed());
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Number(2.0)));
        assert!(cursor.is_closed());
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 3);
        assert!(!cursor.has_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_close_keeps_has_more() {
        let (cursor, _) = memory_cursor(numbers(3));
        let mut cursor = cursor.with_shared(true);
        cursor.next().await.unwrap();
        assert!(cursor.has_more());
        cursor.close().await.unwrap();
        assert!(cursor.has_more());
        assert!(!cursor.has_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_buffered_close_clears_state() {
        let (cursor, provider) = memory_cursor(numbers(10));
        let mut cursor = cursor.with_batch_size(2);
        cursor.next().await.unwrap();
        cursor.close().await.unwrap();
        assert!(!cursor.has_more());
        assert_eq!(cursor.buffered(), 0);
        assert_eq!(provider.open_count(), 0);
        assert_eq!(cursor.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_unopened() {
        let (mut cursor, provider) = memory_cursor(numbers(1));
        cursor.close().await.unwrap();
        assert!(cursor.is_closed());
        assert!(!cursor.has_next().await.unwrap());
        assert_eq!(provider.open_count(), 0);
    }

    #[tokio::test]
    async fn test_passthru_replay_does_not_open() {
        let (mut cursor, provider) = memory_cursor(numbers(4));
        let description = cursor.passthru(true).await.unwrap();
        assert_eq!(description.to_json()["source"], "memory");
        assert_eq!(cursor.state(), CursorState::Unopened);
        assert_eq!(provider.open_count(), 0);

        let live = cursor.passthru(false).await.unwrap();
        assert_eq!(live.to_json()["object"], "cursor");
        assert_eq!(cursor.state(), CursorState::Opened);
    }

    #[tokio::test]
    async fn test_writable_buffered_push_after_short_fetch() {
        let (cursor, provider) = memory_cursor(numbers(1));
        let mut cursor = WritableCursor::new(cursor.with_batch_size(10));
        assert!(cursor.has_next().await.unwrap());
        assert_eq!(cursor.inner().buffered(), 1);

        cursor.push(vec![Value::Number(2.0)]).await.unwrap();
        assert_eq!(
            cursor.to_array(None).await.unwrap(),
            vec![Value::Number(0.0), Value::Number(2.0)]
        );
        assert!(cursor.is_closed());
        assert_eq!(provider.open_count(), 0);
    }

    #[tokio::test]
    async fn test_writable_buffered_push_before_open() {
        let (cursor, _) = memory_cursor(numbers(1));
        let mut cursor = WritableCursor::new(cursor);
        cursor.push(vec![Value::from("late")]).await.unwrap();
        assert_eq!(
            cursor.to_array(None).await.unwrap(),
            vec![Value::Number(0.0), Value::from("late")]
        );
    }

    #[tokio::test]
    async fn test_writable_shared_push() {
        let (cursor, _) = memory_cursor(numbers(2));
        let mut cursor = WritableCursor::new(cursor.with_shared(true));
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Number(0.0)));
        cursor.push(vec![Value::from("pushed")]).await.unwrap();
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Number(1.0)));
        assert_eq!(cursor.next().await.unwrap(), Some(Value::from("pushed")));
        assert!(cursor.is_closed());
        assert!(cursor.push(vec![Value::Null]).await.is_err());
    }
}
