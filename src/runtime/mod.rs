//! Runtime operation tracking.
//!
//! Every long-running unit of work (a request, an import, an open cursor) is
//! wrapped in a [`RuntimeOperation`] and registered in an
//! [`OperationRegistry`] while it runs. The registry backs graceful shutdown
//! ([`shutdown::drain`]) and the cluster command surface
//! ([`RuntimeCommands`]).
//!
//! Cancellation flows from parent to child through explicit child lists held
//! by the parent; `detach` removes a child from that list.

pub mod commands;
pub mod events;
pub mod operation;
pub mod registry;
pub mod shutdown;

pub use commands::{RuntimeCommands, CANCEL_OPERATIONS, FIND_OPERATIONS};
pub use events::{EventError, OperationEvent, OperationEventBus, OperationEventReceiver};
pub use operation::{OperationHook, OperationState, RuntimeOperation, RuntimeOperationBuilder};
pub use registry::{OperationFilter, OperationRegistry};
pub use shutdown::{drain, DrainReport};
