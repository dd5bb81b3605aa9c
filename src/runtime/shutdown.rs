use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::operation::RuntimeOperation;
use super::registry::{OperationFilter, OperationRegistry};
use crate::config::ShutdownConfig;
use crate::error::Fault;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Cursor-bearing operations that finished inside the grace period.
    pub drained: usize,
    /// Operations cancelled after the deadline.
    pub aborted: usize,
}

async fn open_cursor_operations(registry: &OperationRegistry) -> Vec<Arc<RuntimeOperation>> {
    let mut open = Vec::new();
    for op in registry.find(&OperationFilter::default()) {
        if op.has_open_cursor().await {
            open.push(op);
        } else {
            op.release().await;
        }
    }
    open
}

/// Waits for operations with an open cursor to finish, polling every
/// `poll_interval`; whatever is still open after `grace_period` is cancelled
/// with an aborted fault. Cursor results that were closed are released.
#[instrument(skip_all)]
pub async fn drain(registry: &OperationRegistry, config: &ShutdownConfig) -> DrainReport {
    let deadline = Instant::now() + config.grace_period;
    let initial = open_cursor_operations(registry).await.len();
    info!("draining {} operations with open cursors", initial);

    loop {
        let open = open_cursor_operations(registry).await;
        if open.is_empty() {
            return DrainReport {
                drained: initial,
                aborted: 0,
            };
        }
        if Instant::now() >= deadline {
            warn!(
                "shutdown grace period elapsed, aborting {} operations",
                open.len()
            );
            for op in &open {
                let reason = Fault::aborted("Shutdown grace period elapsed");
                if let Err(e) = op.cancel(Some(reason)).await {
                    warn!("failed to cancel operation {}: {}", op.uuid(), e);
                }
            }
            return DrainReport {
                drained: initial.saturating_sub(open.len()),
                aborted: open.len(),
            };
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}
