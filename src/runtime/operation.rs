use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::events::OperationEvent;
use super::registry::OperationRegistry;
use crate::cursor::CursorRef;
use crate::error::{Fault, FaultResult};
use crate::value::{format_iso, ObjectId};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Idle,
    Starting,
    Started,
    Cancelling,
    Stopping,
    Stopped,
}

impl OperationState {
    pub fn is_active(&self) -> bool {
        matches!(self, OperationState::Starting | OperationState::Started)
    }

    pub fn is_finishing(&self) -> bool {
        matches!(
            self,
            OperationState::Cancelling | OperationState::Stopping | OperationState::Stopped
        )
    }
}

/// Per-instance hook run on cancel or stop.
pub type OperationHook =
    Arc<dyn Fn(Arc<RuntimeOperation>) -> BoxFuture<'static, FaultResult<()>> + Send + Sync>;

#[derive(Default)]
struct OperationInner {
    parent: Option<Weak<RuntimeOperation>>,
    children: Vec<Weak<RuntimeOperation>>,
    started: Option<DateTime<Utc>>,
    cancelled: Option<DateTime<Utc>>,
    stopped: Option<DateTime<Utc>>,
    err: Option<Fault>,
    cursor: Option<CursorRef>,
    release_on_close: bool,
}

/// A registered, cancellable unit of long-running work.
///
/// Cancellation is cooperative: `cancel` flips the state, runs the cancel
/// hook, closes any attached cursor and then stops the operation. Code doing
/// the actual work polls [`RuntimeOperation::is_cancelled`] or
/// [`crate::eval::ExecutionContext::check_cancelled`].
pub struct RuntimeOperation {
    id: ObjectId,
    uuid: Uuid,
    env: Option<String>,
    op_type: String,
    context: serde_json::Value,
    parent_uuid: Option<Uuid>,
    registry: Arc<OperationRegistry>,
    on_cancel: Option<OperationHook>,
    on_stop: Option<OperationHook>,
    state: watch::Sender<OperationState>,
    inner: Mutex<OperationInner>,
}

impl fmt::Debug for RuntimeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOperation")
            .field("uuid", &self.uuid)
            .field("type", &self.op_type)
            .field("env", &self.env)
            .field("state", &self.state())
            .finish()
    }
}

pub struct RuntimeOperationBuilder {
    op_type: String,
    env: Option<String>,
    context: serde_json::Value,
    parent: Option<Arc<RuntimeOperation>>,
    registry: Option<Arc<OperationRegistry>>,
    on_cancel: Option<OperationHook>,
    on_stop: Option<OperationHook>,
}

impl RuntimeOperationBuilder {
    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn parent(mut self, parent: &Arc<RuntimeOperation>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn registry(mut self, registry: Arc<OperationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<RuntimeOperation>) -> BoxFuture<'static, FaultResult<()>> + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(hook));
        self
    }

    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<RuntimeOperation>) -> BoxFuture<'static, FaultResult<()>> + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    /// Children inherit the parent's env and registry unless set explicitly.
    pub fn build(self) -> Arc<RuntimeOperation> {
        let registry = self
            .registry
            .or_else(|| self.parent.as_ref().map(|p| p.registry.clone()))
            .unwrap_or_else(OperationRegistry::global);
        let env = self
            .env
            .or_else(|| self.parent.as_ref().and_then(|p| p.env.clone()));
        let (state, _) = watch::channel(OperationState::Idle);

        let operation = Arc::new(RuntimeOperation {
            id: ObjectId::new(),
            uuid: Uuid::new_v4(),
            env,
            op_type: self.op_type,
            context: self.context,
            parent_uuid: self.parent.as_ref().map(|p| p.uuid),
            registry,
            on_cancel: self.on_cancel,
            on_stop: self.on_stop,
            state,
            inner: Mutex::new(OperationInner::default()),
        });

        if let Some(parent) = &self.parent {
            operation.lock().parent = Some(Arc::downgrade(parent));
            parent.lock().children.push(Arc::downgrade(&operation));
        }
        operation
    }
}

impl RuntimeOperation {
    pub fn builder(op_type: impl Into<String>) -> RuntimeOperationBuilder {
        RuntimeOperationBuilder {
            op_type: op_type.into(),
            env: None,
            context: serde_json::Value::Null,
            parent: None,
            registry: None,
            on_cancel: None,
            on_stop: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OperationInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn parent_uuid(&self) -> Option<Uuid> {
        self.parent_uuid
    }

    pub fn parent(&self) -> Option<Arc<RuntimeOperation>> {
        self.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<RuntimeOperation>> {
        self.lock().children.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled.is_some()
    }

    pub fn err(&self) -> Option<Fault> {
        self.lock().err.clone()
    }

    fn set_state(&self, state: OperationState) {
        self.state.send_replace(state);
        self.publish_state(state);
    }

    fn publish_state(&self, state: OperationState) {
        self.registry.events().publish(OperationEvent::StateChanged {
            uuid: self.uuid,
            state,
        });
    }

    /// Moves to `next` unless the operation is already finishing. Only the
    /// caller that made the move gets `true`.
    fn enter(&self, next: OperationState) -> bool {
        let entered = self.state.send_if_modified(|state| {
            if state.is_finishing() {
                return false;
            }
            *state = next;
            true
        });
        if entered {
            self.publish_state(next);
        }
        entered
    }

    /// Registers the operation and marks it started.
    #[instrument(skip(self), fields(uuid = %self.uuid, op_type = %self.op_type))]
    pub fn start(self: &Arc<Self>) -> FaultResult<()> {
        let current = self.state();
        if current != OperationState::Idle {
            return Err(Fault::invalid_argument(format!(
                "Operation {} cannot start from state {}",
                self.uuid, current
            )));
        }
        self.set_state(OperationState::Starting);
        self.registry.register(self.clone());
        self.lock().started = Some(Utc::now());
        self.set_state(OperationState::Started);
        Ok(())
    }

    /// Cancels this operation and, transitively, its children. Repeated
    /// calls are no-ops.
    pub fn cancel(self: &Arc<Self>, err: Option<Fault>) -> BoxFuture<'static, FaultResult<()>> {
        let this = self.clone();
        Box::pin(async move { this.cancel_inner(err).await })
    }

    async fn cancel_inner(self: Arc<Self>, err: Option<Fault>) -> FaultResult<()> {
        if !self.enter(OperationState::Cancelling) {
            return Ok(());
        }
        let err = err.unwrap_or_else(|| Fault::aborted("Operation cancelled"));
        let cursor = {
            let mut inner = self.lock();
            inner.cancelled = Some(Utc::now());
            inner.err = Some(err.clone());
            inner.cursor.clone()
        };
        self.registry.events().publish(OperationEvent::Cancelled {
            uuid: self.uuid,
            reason: err.reason.clone(),
        });
        debug!("operation {} cancelled: {}", self.uuid, err);

        // the stop sequence runs even when a child or the hook fails
        let mut first_err = None;
        for child in self.children() {
            if let Err(e) = child.cancel(Some(err.clone())).await {
                warn!("failed to cancel child {} of {}: {}", child.uuid, self.uuid, e);
                first_err.get_or_insert(e);
            }
        }
        if let Some(hook) = &self.on_cancel {
            if let Err(e) = hook(self.clone()).await {
                warn!("cancel hook of operation {} failed: {}", self.uuid, e);
                first_err.get_or_insert(e);
            }
        }
        if let Some(cursor) = cursor {
            if let Err(e) = cursor.close().await {
                warn!("failed to close cursor of cancelled operation {}: {}", self.uuid, e);
            }
        }
        self.set_state(OperationState::Stopping);
        let finished = self.finish().await;
        match first_err {
            Some(e) => Err(e),
            None => finished,
        }
    }

    /// Stops this operation and its children. A no-op once the operation
    /// is cancelling or stopping.
    pub fn stop(self: &Arc<Self>) -> BoxFuture<'static, FaultResult<()>> {
        let this = self.clone();
        Box::pin(async move {
            if !this.enter(OperationState::Stopping) {
                return Ok(());
            }
            this.finish().await
        })
    }

    async fn finish(self: &Arc<Self>) -> FaultResult<()> {
        let mut result = match &self.on_stop {
            Some(hook) => hook(self.clone()).await,
            None => Ok(()),
        };
        self.registry.unregister(self);
        self.lock().stopped = Some(Utc::now());
        self.set_state(OperationState::Stopped);

        let children = std::mem::take(&mut self.lock().children);
        for child in children.iter().filter_map(Weak::upgrade) {
            child.lock().parent = None;
            if let Err(e) = child.stop().await {
                warn!("failed to stop child {} of {}: {}", child.uuid, self.uuid, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Detaches from the parent so neither cancel nor stop cascades here.
    pub fn detach(&self) {
        let parent = self.lock().parent.take().and_then(|p| p.upgrade());
        if let Some(parent) = parent {
            parent
                .lock()
                .children
                .retain(|child| child.upgrade().map_or(false, |c| c.uuid != self.uuid));
        }
    }

    /// Waits until the operation reached `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == OperationState::Stopped).await;
    }

    pub fn attach_cursor(&self, cursor: CursorRef) {
        self.lock().cursor = Some(cursor);
    }

    /// Attaches `cursor` as the operation's result: the operation stops as
    /// soon as the cursor is closed, by its consumer or by exhaustion.
    pub fn release_on_close(self: &Arc<Self>, cursor: CursorRef) {
        {
            let mut inner = self.lock();
            inner.cursor = Some(cursor.clone());
            inner.release_on_close = true;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let operation = Arc::downgrade(self);
        handle.spawn(async move {
            cursor.closed().await;
            if let Some(operation) = operation.upgrade() {
                operation.release().await;
            }
        });
    }

    /// Stops a released operation whose cursor is closed. Returns whether
    /// this call stopped it.
    pub async fn release(self: &Arc<Self>) -> bool {
        let cursor = {
            let inner = self.lock();
            match (&inner.cursor, inner.release_on_close) {
                (Some(cursor), true) => cursor.clone(),
                _ => return false,
            }
        };
        if !cursor.is_closed().await || !self.enter(OperationState::Stopping) {
            return false;
        }
        debug!("operation {} released by its closed cursor", self.uuid);
        if let Err(e) = self.finish().await {
            warn!("failed to stop released operation {}: {}", self.uuid, e);
        }
        true
    }

    pub fn cursor(&self) -> Option<CursorRef> {
        self.lock().cursor.clone()
    }

    pub async fn has_open_cursor(&self) -> bool {
        match self.cursor() {
            Some(cursor) => !cursor.is_closed().await,
            None => false,
        }
    }

    pub fn export(&self) -> serde_json::Value {
        let inner = self.lock();
        serde_json::json!({
            "uuid": self.uuid.to_string(),
            "_id": self.id.to_hex(),
            "env": self.env,
            "type": self.op_type,
            "state": self.state().to_string(),
            "started": inner.started.as_ref().map(format_iso),
            "cancelled": inner.cancelled.as_ref().map(format_iso),
            "stopped": inner.stopped.as_ref().map(format_iso),
            "parent": self.parent_uuid.map(|u| u.to_string()),
            "context": self.context,
            "err": inner.err.as_ref().map(Fault::to_json),
        })
    }
}
