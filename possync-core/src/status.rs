//! Sync lifecycle state machines.
//!
//! Entities move `local → pending → syncing → {synced, error, conflict}` and
//! re-enter `pending` on the next local mutation. Queued operations move
//! `pending → syncing → {complete, failed}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Sync status carried on every syncable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Local,
    Pending,
    Syncing,
    Synced,
    Conflict,
    Error,
}

/// Things that happen to an entity and move its sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    /// The entity was changed on this device.
    LocalMutation,
    /// An operation carrying the entity was queued.
    Enqueued,
    /// The dispatcher claimed the operation carrying the current version.
    DispatchStarted,
    /// The current version reached the remote side.
    DispatchSucceeded,
    /// Transmission failed but the operation will be retried.
    DispatchRetrying,
    /// Transmission failed and the retry budget is exhausted.
    DispatchFailed,
    /// An operator reset the failed operation for another attempt.
    RetryRequested,
    /// A causally newer remote snapshot replaced the local one.
    RemoteAccepted,
    /// A concurrent remote snapshot was detected.
    ConflictDetected,
    /// An explicit resolution was applied to a conflict.
    ConflictResolved,
}

impl SyncStatus {
    /// Returns the status after `event`, or an error if the event is not
    /// allowed from the current status.
    pub fn apply(self, event: SyncEvent) -> Result<SyncStatus, SyncError> {
        use SyncEvent::*;
        use SyncStatus::*;

        let next = match (self, event) {
            (Conflict, LocalMutation) => None,
            (_, LocalMutation) => Some(Pending),
            (Local | Pending | Error, Enqueued) => Some(Pending),
            (Pending | Syncing, DispatchStarted) => Some(Syncing),
            (Pending | Syncing, DispatchSucceeded) => Some(Synced),
            (Pending | Syncing, DispatchRetrying) => Some(Pending),
            (Pending | Syncing, DispatchFailed) => Some(Error),
            (Error, RetryRequested) => Some(Pending),
            (_, RemoteAccepted) => Some(Synced),
            (_, ConflictDetected) => Some(Conflict),
            (Conflict, ConflictResolved) => Some(Pending),
            _ => None,
        };

        next.ok_or(SyncError::InvalidTransition { from: self, event })
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Local => write!(f, "local"),
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Conflict => write!(f, "conflict"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SyncStatus::Local),
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            "error" => Ok(SyncStatus::Error),
            _ => Err(SyncError::Parse {
                kind: "sync status",
                value: s.to_string(),
                valid: "local, pending, syncing, synced, conflict, error",
            }),
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncEvent::LocalMutation => "local mutation",
            SyncEvent::Enqueued => "enqueued",
            SyncEvent::DispatchStarted => "dispatch started",
            SyncEvent::DispatchSucceeded => "dispatch succeeded",
            SyncEvent::DispatchRetrying => "dispatch retrying",
            SyncEvent::DispatchFailed => "dispatch failed",
            SyncEvent::RetryRequested => "retry requested",
            SyncEvent::RemoteAccepted => "remote accepted",
            SyncEvent::ConflictDetected => "conflict detected",
            SyncEvent::ConflictResolved => "conflict resolved",
        };
        write!(f, "{}", name)
    }
}

/// Status of a queued sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Complete,
    Failed,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 4] = [
        OperationStatus::Pending,
        OperationStatus::Syncing,
        OperationStatus::Complete,
        OperationStatus::Failed,
    ];

    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Pending, Pending)
                | (Pending, Complete)
                | (Pending, Failed)
                | (Syncing, Pending)
                | (Syncing, Complete)
                | (Syncing, Failed)
                | (Failed, Pending)
        )
    }

    pub fn transition(self, next: OperationStatus) -> Result<OperationStatus, SyncError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SyncError::InvalidOperationTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Syncing => "syncing",
            OperationStatus::Complete => "complete",
            OperationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "syncing" => Ok(OperationStatus::Syncing),
            "complete" => Ok(OperationStatus::Complete),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(SyncError::Parse {
                kind: "operation status",
                value: s.to_string(),
                valid: "pending, syncing, complete, failed",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_happy_path() {
        let status = SyncStatus::Local
            .apply(SyncEvent::Enqueued)
            .and_then(|s| s.apply(SyncEvent::DispatchStarted))
            .and_then(|s| s.apply(SyncEvent::DispatchSucceeded))
            .unwrap();
        assert_eq!(status, SyncStatus::Synced);

        // synced re-enters pending on the next local change
        assert_eq!(
            status.apply(SyncEvent::LocalMutation).unwrap(),
            SyncStatus::Pending
        );
    }

    #[test]
    fn test_conflict_blocks_local_mutation() {
        let err = SyncStatus::Conflict
            .apply(SyncEvent::LocalMutation)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { .. }));

        assert_eq!(
            SyncStatus::Conflict
                .apply(SyncEvent::ConflictResolved)
                .unwrap(),
            SyncStatus::Pending
        );
    }

    #[test]
    fn test_conflict_resolved_only_from_conflict() {
        assert!(SyncStatus::Synced
            .apply(SyncEvent::ConflictResolved)
            .is_err());
        assert!(SyncStatus::Pending
            .apply(SyncEvent::ConflictResolved)
            .is_err());
    }

    #[test]
    fn test_error_requires_retry_or_new_mutation() {
        let status = SyncStatus::Syncing.apply(SyncEvent::DispatchFailed).unwrap();
        assert_eq!(status, SyncStatus::Error);
        assert!(status.apply(SyncEvent::DispatchStarted).is_err());
        assert_eq!(
            status.apply(SyncEvent::RetryRequested).unwrap(),
            SyncStatus::Pending
        );
        assert_eq!(
            status.apply(SyncEvent::LocalMutation).unwrap(),
            SyncStatus::Pending
        );
    }

    #[test]
    fn test_dispatch_retrying_reverts_to_pending() {
        assert_eq!(
            SyncStatus::Syncing
                .apply(SyncEvent::DispatchRetrying)
                .unwrap(),
            SyncStatus::Pending
        );
        assert!(SyncStatus::Synced
            .apply(SyncEvent::DispatchRetrying)
            .is_err());
    }

    #[test]
    fn test_remote_accept_settles_any_state() {
        for status in [
            SyncStatus::Local,
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Conflict,
            SyncStatus::Error,
        ] {
            assert_eq!(
                status.apply(SyncEvent::RemoteAccepted).unwrap(),
                SyncStatus::Synced
            );
        }
    }

    #[test]
    fn test_sync_status_from_str() {
        assert_eq!(SyncStatus::from_str("SYNCED").unwrap(), SyncStatus::Synced);
        assert!(SyncStatus::from_str("failed").is_err());
    }

    #[test]
    fn test_operation_transitions() {
        use OperationStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Complete.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Syncing));
        assert!(!Syncing.can_transition_to(Syncing));
    }

    #[test]
    fn test_operation_transition_error() {
        let err = OperationStatus::Complete
            .transition(OperationStatus::Pending)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot move operation from 'complete' to 'pending'"
        );
    }

    #[test]
    fn test_operation_status_json() {
        let json = serde_json::to_string(&OperationStatus::Syncing).unwrap();
        assert_eq!(json, "\"syncing\"");
        assert_eq!(
            OperationStatus::from_str("Failed").unwrap(),
            OperationStatus::Failed
        );
    }
}
