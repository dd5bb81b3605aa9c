use std::sync::Arc;
use std::time::Duration;

use cortex_expressions::runtime::{OperationEvent, OperationFilter, OperationState};
use cortex_expressions::{Fault, OperationRegistry, RuntimeOperation};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

fn operation(registry: &Arc<OperationRegistry>, op_type: &str) -> Arc<RuntimeOperation> {
    RuntimeOperation::builder(op_type)
        .env("test")
        .registry(registry.clone())
        .build()
}

#[tokio::test]
async fn test_double_unregister_is_harmless() {
    let registry = Arc::new(OperationRegistry::new());
    let op = operation(&registry, "import");
    op.start().unwrap();
    op.stop().await.unwrap();
    assert!(registry.is_empty());

    registry.unregister(&op);
    registry.unregister(&op);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_register_twice_keeps_one_entry() {
    let registry = Arc::new(OperationRegistry::new());
    let op = operation(&registry, "import");
    let mut events = registry.events().subscribe();

    op.start().unwrap();
    registry.register(op.clone());
    assert_eq!(registry.count(&OperationFilter::by_uuid(op.uuid())), 1);
    assert_eq!(registry.count(&OperationFilter::by_env("test")), 1);

    let mut registered = 0;
    while let Ok(Ok(event)) = timeout(Duration::from_millis(20), events.recv()).await {
        if matches!(event, OperationEvent::Registered { .. }) {
            registered += 1;
        }
    }
    assert_eq!(registered, 1);
}

#[tokio::test]
async fn test_cancel_cascades_to_tree() {
    let registry = Arc::new(OperationRegistry::new());
    let root = operation(&registry, "request");
    let child = RuntimeOperation::builder("query").parent(&root).build();
    let grandchild = RuntimeOperation::builder("cursor").parent(&child).build();
    let detached = RuntimeOperation::builder("export").parent(&root).build();
    for op in [&root, &child, &grandchild, &detached] {
        op.start().unwrap();
    }
    detached.detach();
    assert_eq!(registry.count(&OperationFilter::default()), 4);

    root.cancel(Some(Fault::aborted("client went away")))
        .await
        .unwrap();

    for op in [&root, &child, &grandchild] {
        assert_eq!(op.state(), OperationState::Stopped);
        assert_eq!(op.err().unwrap().reason, "client went away");
    }
    assert_eq!(detached.state(), OperationState::Started);
    assert!(!detached.is_cancelled());
    assert_eq!(registry.count(&OperationFilter::default()), 1);
}
