use std::sync::Arc;

use tracing::{instrument, warn};

use super::registry::{OperationFilter, OperationRegistry};
use crate::error::{Fault, FaultResult, NOT_FOUND_COMMAND};

pub const FIND_OPERATIONS: &str = "runtime.operations.find";
pub const CANCEL_OPERATIONS: &str = "runtime.operations.cancel";

/// Command surface used by the cluster to inspect and cancel operations on
/// this node.
pub struct RuntimeCommands {
    registry: Arc<OperationRegistry>,
}

impl RuntimeCommands {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, filter))]
    pub async fn execute(
        &self,
        command: &str,
        filter: serde_json::Value,
    ) -> FaultResult<serde_json::Value> {
        let filter: OperationFilter = if filter.is_null() {
            OperationFilter::default()
        } else {
            serde_json::from_value(filter)
                .map_err(|e| Fault::invalid_argument(format!("Invalid operation filter: {}", e)))?
        };

        match command {
            FIND_OPERATIONS => Ok(serde_json::Value::Array(
                self.registry
                    .find(&filter)
                    .iter()
                    .map(|op| op.export())
                    .collect(),
            )),
            // every match is cancelled; failures are reported per operation
            CANCEL_OPERATIONS => {
                let mut cancelled = Vec::new();
                for op in self.registry.find(&filter) {
                    let result = op.cancel(None).await;
                    let mut descriptor = op.export();
                    if let Err(e) = result {
                        warn!("failed to cancel operation {}: {}", op.uuid(), e);
                        descriptor["cancelError"] = e.to_json();
                    }
                    cancelled.push(descriptor);
                }
                Ok(serde_json::Value::Array(cancelled))
            }
            other => Err(Fault::not_found(
                NOT_FOUND_COMMAND,
                format!("Unknown runtime command: {}", other),
            )),
        }
    }
}
