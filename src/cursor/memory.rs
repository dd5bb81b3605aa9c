use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{CursorProvider, CursorSource, FetchResult};
use crate::error::{Fault, FaultResult, NOT_FOUND_COMMAND};
use crate::value::Value;

#[derive(Debug, Default)]
struct MemoryCursorState {
    items: VecDeque<Value>,
}

/// In-process cursor provider. Closing a cursor drops its state; unknown ids
/// report as closed.
#[derive(Debug, Default)]
pub struct MemoryCursorProvider {
    cursors: DashMap<String, MemoryCursorState>,
}

impl MemoryCursorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, items: Vec<Value>) -> String {
        let id = Uuid::new_v4().to_string();
        self.cursors.insert(
            id.clone(),
            MemoryCursorState {
                items: items.into(),
            },
        );
        id
    }

    pub fn remaining(&self, id: &str) -> Option<usize> {
        self.cursors.get(id).map(|state| state.items.len())
    }

    pub fn open_count(&self) -> usize {
        self.cursors.len()
    }

    fn missing(id: &str) -> Fault {
        Fault::not_found(NOT_FOUND_COMMAND, format!("Cursor not found: {}", id))
    }
}

#[async_trait]
impl CursorProvider for MemoryCursorProvider {
    async fn fetch(&self, id: &str, count: usize) -> FaultResult<FetchResult> {
        let Some(mut state) = self.cursors.get_mut(id) else {
            return Ok(FetchResult::default());
        };
        let take = count.min(state.items.len());
        let buffer: Vec<Value> = state.items.drain(..take).collect();
        let has_more = !state.items.is_empty();
        Ok(FetchResult {
            buffer,
            has_more,
            has_next: has_more,
        })
    }

    async fn close(&self, id: &str) -> FaultResult<()> {
        if self.cursors.remove(id).is_some() {
            debug!("memory cursor closed: {}", id);
        }
        Ok(())
    }

    async fn has_next(&self, id: &str) -> FaultResult<bool> {
        Ok(self
            .cursors
            .get(id)
            .map(|state| !state.items.is_empty())
            .unwrap_or(false))
    }

    async fn is_closed(&self, id: &str) -> FaultResult<bool> {
        Ok(!self.cursors.contains_key(id))
    }

    async fn push(&self, id: &str, items: Vec<Value>) -> FaultResult<()> {
        let mut state = self.cursors.get_mut(id).ok_or_else(|| Self::missing(id))?;
        state.items.extend(items);
        Ok(())
    }
}

/// Deferred source over a fixed list of items.
pub struct MemorySource {
    provider: Arc<MemoryCursorProvider>,
    items: Vec<Value>,
    description: Option<Value>,
}

impl MemorySource {
    pub fn new(provider: Arc<MemoryCursorProvider>, items: Vec<Value>) -> Self {
        Self {
            provider,
            items,
            description: None,
        }
    }

    pub fn with_description(mut self, description: Value) -> Self {
        self.description = Some(description);
        self
    }
}

#[async_trait]
impl CursorSource for MemorySource {
    async fn describe(&self) -> FaultResult<Value> {
        Ok(self.description.clone().unwrap_or_else(|| {
            Value::object([
                ("object", Value::from("query")),
                ("source", Value::from("memory")),
                ("count", Value::Number(self.items.len() as f64)),
            ])
        }))
    }

    async fn open(&self) -> FaultResult<String> {
        Ok(self.provider.insert(self.items.clone()))
    }
}
