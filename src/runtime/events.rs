use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::operation::OperationState;

/// Lifecycle notifications published by [`super::OperationRegistry`] and
/// [`super::RuntimeOperation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    Registered { uuid: Uuid },
    Unregistered { uuid: Uuid },
    StateChanged { uuid: Uuid, state: OperationState },
    Cancelled { uuid: Uuid, reason: String },
}

impl OperationEvent {
    pub fn uuid(&self) -> Uuid {
        match self {
            OperationEvent::Registered { uuid }
            | OperationEvent::Unregistered { uuid }
            | OperationEvent::StateChanged { uuid, .. }
            | OperationEvent::Cancelled { uuid, .. } => *uuid,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Event receiver lagged behind by {count} events")]
    Lagged { count: u64 },
    #[error("Event channel closed")]
    Closed,
}

pub struct OperationEventBus {
    sender: broadcast::Sender<OperationEvent>,
}

impl Default for OperationEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl OperationEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> OperationEventReceiver {
        OperationEventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Stream of events; lagged gaps are skipped.
    pub fn stream(&self) -> impl Stream<Item = OperationEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|event| async move { event.ok() })
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: OperationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct OperationEventReceiver {
    receiver: broadcast::Receiver<OperationEvent>,
}

impl OperationEventReceiver {
    /// Laggedの場合はresubscribeしてエラーを返す。
    pub async fn recv(&mut self) -> Result<OperationEvent, EventError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count })
            }
            Err(broadcast::error::RecvError::Closed) => Err(EventError::Closed),
        }
    }
}
