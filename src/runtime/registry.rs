use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::{OperationEvent, OperationEventBus};
use super::operation::{OperationState, RuntimeOperation};
use crate::value::ObjectId;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<OperationRegistry> = Arc::new(OperationRegistry::new());
}

/// Filter accepted by `find`/`count` and by the cluster commands. Every set
/// field must match.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFilter {
    pub uuid: Option<Uuid>,
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub env: Option<String>,
    #[serde(rename = "type")]
    pub op_type: Option<String>,
    pub state: Option<OperationState>,
    pub parent: Option<Uuid>,
}

impl OperationFilter {
    pub fn by_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            ..Default::default()
        }
    }

    pub fn by_env(env: impl Into<String>) -> Self {
        Self {
            env: Some(env.into()),
            ..Default::default()
        }
    }

    fn matches(&self, op: &RuntimeOperation) -> bool {
        self.uuid.map_or(true, |u| u == op.uuid())
            && self.id.as_deref().map_or(true, |id| id == op.id().to_hex())
            && self.env.as_deref().map_or(true, |env| Some(env) == op.env())
            && self.op_type.as_deref().map_or(true, |t| t == op.op_type())
            && self.state.map_or(true, |s| s == op.state())
            && self.parent.map_or(true, |p| Some(p) == op.parent_uuid())
    }
}

/// Identity fields copied from the operation at registration time.
#[derive(Debug, Clone)]
struct OperationRecord {
    id: ObjectId,
    env: Option<String>,
    operation: Arc<RuntimeOperation>,
}

/// Process-wide indexed table of active operations.
pub struct OperationRegistry {
    operations: DashMap<Uuid, OperationRecord>,
    by_id: DashMap<ObjectId, Uuid>,
    by_env: DashMap<String, HashSet<Uuid>>,
    events: OperationEventBus,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
            by_id: DashMap::new(),
            by_env: DashMap::new(),
            events: OperationEventBus::default(),
        }
    }

    pub fn global() -> Arc<OperationRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn events(&self) -> &OperationEventBus {
        &self.events
    }

    /// Inserts or replaces the record keyed by the operation's uuid.
    pub fn register(&self, operation: Arc<RuntimeOperation>) {
        let uuid = operation.uuid();
        let record = OperationRecord {
            id: operation.id(),
            env: operation.env().map(str::to_string),
            operation,
        };
        self.by_id.insert(record.id, uuid);
        if let Some(env) = &record.env {
            self.by_env.entry(env.clone()).or_default().insert(uuid);
        }
        if self.operations.insert(uuid, record).is_some() {
            debug!("operation {} registered again", uuid);
        } else {
            self.events.publish(OperationEvent::Registered { uuid });
        }
    }

    /// Removes the operation. Unknown or still-active operations are logged,
    /// never rejected.
    pub fn unregister(&self, operation: &RuntimeOperation) {
        let uuid = operation.uuid();
        let Some((_, record)) = self.operations.remove(&uuid) else {
            warn!("unregistering unknown operation {}", uuid);
            return;
        };
        if record.operation.state().is_active() {
            warn!(
                "operation {} unregistered while still {}",
                uuid,
                record.operation.state()
            );
        }
        self.by_id.remove(&record.id);
        if let Some(env) = &record.env {
            let emptied = self
                .by_env
                .get_mut(env)
                .map(|mut set| {
                    set.remove(&uuid);
                    set.is_empty()
                })
                .unwrap_or(false);
            if emptied {
                self.by_env.remove_if(env, |_, set| set.is_empty());
            }
        }
        self.events.publish(OperationEvent::Unregistered { uuid });
    }

    pub fn get(&self, uuid: &Uuid) -> Option<Arc<RuntimeOperation>> {
        self.operations.get(uuid).map(|r| r.operation.clone())
    }

    fn candidates(&self, filter: &OperationFilter) -> Vec<Uuid> {
        if let Some(uuid) = filter.uuid {
            return vec![uuid];
        }
        if let Some(id) = &filter.id {
            return ObjectId::from_str(id)
                .ok()
                .and_then(|id| self.by_id.get(&id).map(|u| *u))
                .into_iter()
                .collect();
        }
        if let Some(env) = &filter.env {
            return self
                .by_env
                .get(env)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
        }
        self.operations.iter().map(|r| *r.key()).collect()
    }

    pub fn find(&self, filter: &OperationFilter) -> Vec<Arc<RuntimeOperation>> {
        self.candidates(filter)
            .into_iter()
            .filter_map(|uuid| self.get(&uuid))
            .filter(|op| filter.matches(op))
            .collect()
    }

    pub fn find_one(&self, filter: &OperationFilter) -> Option<Arc<RuntimeOperation>> {
        self.find(filter).into_iter().next()
    }

    pub fn count(&self, filter: &OperationFilter) -> usize {
        self.find(filter).len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(registry: &Arc<OperationRegistry>, op_type: &str, env: &str) -> Arc<RuntimeOperation> {
        RuntimeOperation::builder(op_type)
            .env(env)
            .registry(registry.clone())
            .build()
    }

    #[tokio::test]
    async fn test_indexed_lookups() {
        let registry = Arc::new(OperationRegistry::new());
        let a = op(&registry, "request", "prod");
        let b = op(&registry, "import", "prod");
        let c = op(&registry, "request", "dev");
        for o in [&a, &b, &c] {
            o.start().unwrap();
        }

        assert_eq!(registry.count(&OperationFilter::by_env("prod")), 2);
        assert_eq!(
            registry
                .find_one(&OperationFilter::by_uuid(c.uuid()))
                .map(|o| o.uuid()),
            Some(c.uuid())
        );
        let by_id = OperationFilter {
            id: Some(b.id().to_hex()),
            ..Default::default()
        };
        assert_eq!(registry.find(&by_id).len(), 1);

        let requests = OperationFilter {
            op_type: Some("request".to_string()),
            ..Default::default()
        };
        assert_eq!(registry.count(&requests), 2);
    }

    #[tokio::test]
    async fn test_double_register_keeps_one_entry() {
        let registry = Arc::new(OperationRegistry::new());
        let a = op(&registry, "request", "prod");
        registry.register(a.clone());
        registry.register(a.clone());
        assert_eq!(registry.count(&OperationFilter::by_uuid(a.uuid())), 1);
        assert_eq!(registry.count(&OperationFilter::by_env("prod")), 1);
    }

    #[tokio::test]
    async fn test_double_unregister_only_warns() {
        let registry = Arc::new(OperationRegistry::new());
        let a = op(&registry, "request", "prod");
        a.start().unwrap();
        a.stop().await.unwrap();
        registry.unregister(&a);
        registry.unregister(&a);
        assert!(registry.is_empty());
        assert!(registry.by_env.get("prod").is_none());
    }

    #[tokio::test]
    async fn test_filter_deserializes_from_json() {
        let filter: OperationFilter =
            serde_json::from_str(r#"{"env": "prod", "type": "import", "state": "started"}"#)
                .unwrap();
        assert_eq!(filter.env.as_deref(), Some("prod"));
        assert_eq!(filter.op_type.as_deref(), Some("import"));
        assert_eq!(filter.state, Some(OperationState::Started));
    }

    #[tokio::test]
    async fn test_events_on_register() {
        let registry = Arc::new(OperationRegistry::new());
        let mut rx = registry.events().subscribe();
        let a = op(&registry, "request", "prod");
        registry.register(a.clone());
        assert_eq!(
            rx.recv().await.unwrap(),
            OperationEvent::Registered { uuid: a.uuid() }
        );
    }
}
