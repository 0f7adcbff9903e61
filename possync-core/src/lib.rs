//! possync core library
//!
//! Storage-independent pieces of the offline-first sync core: vector clocks,
//! the sync fields embedded in every syncable entity (versioning, audit,
//! tombstones), queued operation types, the status state machines and
//! conflict classification.

pub mod clock;
pub mod conflict;
pub mod context;
pub mod entity;
pub mod error;
pub mod operation;
pub mod status;

pub use clock::{ClockOrdering, VectorClock};
pub use conflict::{
    classify, last_writer_wins, reconcile, resolve, Classification, ConflictPolicy,
    RemoteOutcome, Resolution,
};
pub use context::MutationContext;
pub use entity::{SyncableEntity, Tombstone, DEFAULT_TOMBSTONE_RETENTION_DAYS};
pub use error::SyncError;
pub use operation::{OperationKind, Priority, SyncOperation, DEFAULT_MAX_RETRIES};
pub use status::{OperationStatus, SyncEvent, SyncStatus};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
