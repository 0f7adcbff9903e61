//! Core sync error types.

use thiserror::Error;

use crate::status::{OperationStatus, SyncEvent, SyncStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Cannot apply '{event}' to an entity in status '{from}'")]
    InvalidTransition { from: SyncStatus, event: SyncEvent },

    #[error("Cannot move operation from '{from}' to '{to}'")]
    InvalidOperationTransition {
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("{0} has an unresolved conflict; resolve it before making changes")]
    UnresolvedConflict(String),

    #[error("{0} is already deleted")]
    AlreadyDeleted(String),

    #[error("{0} is not deleted")]
    NotDeleted(String),

    #[error("{0} is deleted; restore it before updating")]
    Deleted(String),

    #[error("Snapshot is for {actual}, expected {expected}")]
    EntityMismatch { expected: String, actual: String },

    #[error("Invalid {kind} '{value}'. Valid options: {valid}")]
    Parse {
        kind: &'static str,
        value: String,
        valid: &'static str,
    },

    #[error("Invalid priority {0}. Valid options: 1 (high), 2 (medium), 3 (low)")]
    InvalidPriority(i64),
}
