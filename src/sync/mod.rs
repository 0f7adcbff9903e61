//! Sync orchestration over the local store.
//!
//! [`SyncService`] is what entity services call: it applies each local
//! mutation and queues it in one transaction, applies remote snapshots and
//! resolves conflicts. [`Dispatcher`] drains the queue through a
//! [`Transport`].

pub mod dispatcher;
pub mod service;

pub use dispatcher::{DispatchReport, Dispatcher, JsonLinesTransport, Transport, TransportError};
pub use service::{RemoteApplied, ServiceError, SyncService};
