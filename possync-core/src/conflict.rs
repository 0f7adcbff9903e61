//! Classification of remote snapshots against the local entity.
//!
//! Remote snapshots are never merged field-by-field. A causally newer remote
//! replaces the local copy, an older one is ignored, and concurrent edits are
//! flagged as a conflict that stays put until a [`Resolution`] is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::{ClockOrdering, VectorClock};
use crate::context::MutationContext;
use crate::entity::SyncableEntity;
use crate::error::SyncError;
use crate::status::{SyncEvent, SyncStatus};

/// Outcome of comparing a local clock against a remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Remote is strictly newer; overwrite local.
    AcceptRemote,
    /// Local already includes the remote edit.
    IgnoreRemote,
    /// Both sides carry the same clock.
    AlreadySynced,
    /// Concurrent edits on both sides.
    Conflict,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::AcceptRemote => write!(f, "accept_remote"),
            Classification::IgnoreRemote => write!(f, "ignore_remote"),
            Classification::AlreadySynced => write!(f, "already_synced"),
            Classification::Conflict => write!(f, "conflict"),
        }
    }
}

pub fn classify(local: &VectorClock, remote: &VectorClock) -> Classification {
    match local.compare(remote) {
        ClockOrdering::Before => Classification::AcceptRemote,
        ClockOrdering::After => Classification::IgnoreRemote,
        ClockOrdering::Equal => Classification::AlreadySynced,
        ClockOrdering::Concurrent => Classification::Conflict,
    }
}

/// What applying a remote snapshot does to local state.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Store `entity` in place of the local copy.
    Accepted(SyncableEntity),
    /// Keep the local data; `entity` carries the updated status.
    Ignored(SyncableEntity),
    /// Keep the local data; `entity` carries the updated status.
    AlreadySynced(SyncableEntity),
    /// Local moved to conflict; both snapshots must be kept for resolution.
    Conflict {
        local: SyncableEntity,
        remote: SyncableEntity,
    },
}

impl RemoteOutcome {
    pub fn classification(&self) -> Classification {
        match self {
            RemoteOutcome::Accepted(_) => Classification::AcceptRemote,
            RemoteOutcome::Ignored(_) => Classification::IgnoreRemote,
            RemoteOutcome::AlreadySynced(_) => Classification::AlreadySynced,
            RemoteOutcome::Conflict { .. } => Classification::Conflict,
        }
    }

    /// The entity as it should now be stored locally.
    pub fn entity(&self) -> &SyncableEntity {
        match self {
            RemoteOutcome::Accepted(e)
            | RemoteOutcome::Ignored(e)
            | RemoteOutcome::AlreadySynced(e) => e,
            RemoteOutcome::Conflict { local, .. } => local,
        }
    }
}

/// Decide how a remote snapshot changes the local entity. `local` is `None`
/// when the entity has never been seen on this device.
pub fn reconcile(
    local: Option<SyncableEntity>,
    remote: SyncableEntity,
) -> Result<RemoteOutcome, SyncError> {
    let Some(mut local) = local else {
        return Ok(RemoteOutcome::Accepted(accept(remote)?));
    };

    if local.entity_type != remote.entity_type || local.id != remote.id {
        return Err(SyncError::EntityMismatch {
            expected: local.key(),
            actual: remote.key(),
        });
    }

    match classify(&local.vector_clock, &remote.vector_clock) {
        Classification::AcceptRemote => Ok(RemoteOutcome::Accepted(accept(remote)?)),
        Classification::IgnoreRemote => {
            if !local.has_unsynced_changes() && local.sync_status != SyncStatus::Conflict {
                local.sync_status = SyncStatus::Synced;
            }
            Ok(RemoteOutcome::Ignored(local))
        }
        Classification::AlreadySynced => {
            if local.sync_status != SyncStatus::Conflict {
                local.sync_status = local.sync_status.apply(SyncEvent::RemoteAccepted)?;
                local.last_synced_version = Some(local.version);
            }
            Ok(RemoteOutcome::AlreadySynced(local))
        }
        Classification::Conflict => {
            local.sync_status = local.sync_status.apply(SyncEvent::ConflictDetected)?;
            Ok(RemoteOutcome::Conflict { local, remote })
        }
    }
}

fn accept(mut remote: SyncableEntity) -> Result<SyncableEntity, SyncError> {
    remote.sync_status = remote.sync_status.apply(SyncEvent::RemoteAccepted)?;
    remote.last_synced_version = Some(remote.version);
    Ok(remote)
}

/// How conflicts are settled when they are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Record the conflict and wait for an operator decision.
    #[default]
    Manual,
    /// Pick the side with the higher `(version, last_modified_by_device)`.
    /// The losing snapshot is still recorded.
    LastWriterWins,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Manual => write!(f, "manual"),
            ConflictPolicy::LastWriterWins => write!(f, "last_writer_wins"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(ConflictPolicy::Manual),
            "last_writer_wins" | "lww" => Ok(ConflictPolicy::LastWriterWins),
            _ => Err(SyncError::Parse {
                kind: "conflict policy",
                value: s.to_string(),
                valid: "manual, last_writer_wins",
            }),
        }
    }
}

/// An explicit decision for one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
    /// Operator-supplied data replacing both sides.
    Merged(serde_json::Value),
}

impl Resolution {
    pub fn name(&self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep_local",
            Resolution::TakeRemote => "take_remote",
            Resolution::Merged(_) => "merged",
        }
    }
}

/// Deterministic last-writer-wins choice: higher version wins, ties go to the
/// lexically greater device id.
pub fn last_writer_wins(local: &SyncableEntity, remote: &SyncableEntity) -> Resolution {
    let local_key = (local.version, local.last_modified_by_device.as_str());
    let remote_key = (remote.version, remote.last_modified_by_device.as_str());
    if remote_key > local_key {
        Resolution::TakeRemote
    } else {
        Resolution::KeepLocal
    }
}

/// Apply `resolution` to a conflicted pair.
///
/// The result carries the merge of both clocks plus a fresh version from the
/// resolving device, so it dominates both snapshots and propagates as an
/// ordinary pending update.
pub fn resolve(
    local: &SyncableEntity,
    remote: &SyncableEntity,
    resolution: &Resolution,
    ctx: &MutationContext,
    now: DateTime<Utc>,
) -> Result<SyncableEntity, SyncError> {
    if local.sync_status != SyncStatus::Conflict {
        return Err(SyncError::InvalidTransition {
            from: local.sync_status,
            event: SyncEvent::ConflictResolved,
        });
    }

    let mut resolved = match resolution {
        Resolution::KeepLocal => local.clone(),
        Resolution::TakeRemote => SyncableEntity {
            created_at: local.created_at,
            created_by: local.created_by.clone(),
            created_by_device: local.created_by_device.clone(),
            ..remote.clone()
        },
        Resolution::Merged(data) => SyncableEntity {
            data: data.clone(),
            ..local.clone()
        },
    };

    resolved.vector_clock = local.vector_clock.merge(&remote.vector_clock);
    resolved.version = local.version.max(remote.version);
    resolved.last_synced_version = local.last_synced_version;
    resolved.sync_status = SyncStatus::Conflict.apply(SyncEvent::ConflictResolved)?;
    resolved.record_mutation(ctx, now)?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(clock: VectorClock, version: u64, device: &str) -> SyncableEntity {
        let ctx = MutationContext::new("user1", device);
        let mut e = SyncableEntity::new(
            "appointment",
            "a1",
            "tenant1",
            "store1",
            json!({"slot": version}),
            &ctx,
        );
        e.vector_clock = clock;
        e.version = version;
        e.sync_status = SyncStatus::Pending;
        e
    }

    #[test]
    fn test_classify_concurrent() {
        let a = VectorClock::from([("d1", 3), ("d2", 1)]);
        let b = VectorClock::from([("d1", 2), ("d2", 2)]);
        assert_eq!(classify(&a, &b), Classification::Conflict);
    }

    #[test]
    fn test_classify_local_dominates() {
        let a = VectorClock::from([("d1", 3), ("d2", 2)]);
        let b = VectorClock::from([("d1", 2), ("d2", 2)]);
        assert_eq!(classify(&a, &b), Classification::IgnoreRemote);
        assert_eq!(classify(&b, &a), Classification::AcceptRemote);
        assert_eq!(classify(&a, &a.clone()), Classification::AlreadySynced);
    }

    #[test]
    fn test_reconcile_unknown_entity_accepts() {
        let remote = entity(VectorClock::from([("d2", 1)]), 1, "d2");
        let outcome = reconcile(None, remote).unwrap();

        assert_eq!(outcome.classification(), Classification::AcceptRemote);
        assert_eq!(outcome.entity().sync_status, SyncStatus::Synced);
        assert_eq!(outcome.entity().last_synced_version, Some(1));
    }

    #[test]
    fn test_reconcile_accepts_newer_remote() {
        let local = entity(VectorClock::from([("d1", 1)]), 1, "d1");
        let mut remote = entity(VectorClock::from([("d1", 1), ("d2", 2)]), 2, "d2");
        remote.data = json!({"slot": "10:00"});

        let outcome = reconcile(Some(local), remote).unwrap();
        let stored = outcome.entity();
        assert_eq!(outcome.classification(), Classification::AcceptRemote);
        assert_eq!(stored.data["slot"], "10:00");
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.last_synced_version, Some(2));
    }

    #[test]
    fn test_reconcile_ignores_older_remote_keeps_pending() {
        let local = entity(VectorClock::from([("d1", 3), ("d2", 2)]), 3, "d1");
        let remote = entity(VectorClock::from([("d1", 2), ("d2", 2)]), 2, "d2");

        let outcome = reconcile(Some(local.clone()), remote).unwrap();
        assert_eq!(outcome.classification(), Classification::IgnoreRemote);
        assert_eq!(outcome.entity().sync_status, SyncStatus::Pending);
        assert_eq!(outcome.entity().data, local.data);
    }

    #[test]
    fn test_reconcile_ignore_marks_synced_when_nothing_outstanding() {
        let mut local = entity(VectorClock::from([("d1", 3)]), 3, "d1");
        local.last_synced_version = Some(3);
        local.sync_status = SyncStatus::Synced;
        let remote = entity(VectorClock::from([("d1", 2)]), 2, "d1");

        let outcome = reconcile(Some(local), remote).unwrap();
        assert_eq!(outcome.entity().sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_reconcile_ignore_keeps_conflict() {
        let mut local = entity(VectorClock::from([("d1", 3), ("d2", 1)]), 3, "d1");
        local.last_synced_version = Some(3);
        local.sync_status = SyncStatus::Conflict;
        let remote = entity(VectorClock::from([("d1", 1)]), 1, "d1");

        let outcome = reconcile(Some(local), remote).unwrap();
        assert_eq!(outcome.classification(), Classification::IgnoreRemote);
        assert_eq!(outcome.entity().sync_status, SyncStatus::Conflict);
    }

    #[test]
    fn test_reconcile_equal_clocks() {
        let local = entity(VectorClock::from([("d1", 2)]), 2, "d1");
        let remote = local.clone();

        let outcome = reconcile(Some(local), remote).unwrap();
        assert_eq!(outcome.classification(), Classification::AlreadySynced);
        assert_eq!(outcome.entity().sync_status, SyncStatus::Synced);
        assert_eq!(outcome.entity().last_synced_version, Some(2));
    }

    #[test]
    fn test_reconcile_conflict_keeps_local_data() {
        let local = entity(VectorClock::from([("d1", 3), ("d2", 1)]), 3, "d1");
        let remote = entity(VectorClock::from([("d1", 2), ("d2", 2)]), 2, "d2");

        let outcome = reconcile(Some(local.clone()), remote.clone()).unwrap();
        match outcome {
            RemoteOutcome::Conflict {
                local: stored,
                remote: kept,
            } => {
                assert_eq!(stored.sync_status, SyncStatus::Conflict);
                assert_eq!(stored.data, local.data);
                assert_eq!(kept, remote);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_rejects_mismatched_entity() {
        let local = entity(VectorClock::from([("d1", 1)]), 1, "d1");
        let mut remote = local.clone();
        remote.id = "a2".to_string();

        assert!(matches!(
            reconcile(Some(local), remote),
            Err(SyncError::EntityMismatch { .. })
        ));
    }

    #[test]
    fn test_resolve_dominates_both_sides() {
        let mut local = entity(VectorClock::from([("d1", 3), ("d2", 1)]), 3, "d1");
        local.sync_status = SyncStatus::Conflict;
        let remote = entity(VectorClock::from([("d1", 2), ("d2", 2)]), 2, "d2");
        let ctx = MutationContext::new("manager", "d1");

        for resolution in [
            Resolution::KeepLocal,
            Resolution::TakeRemote,
            Resolution::Merged(json!({"slot": "merged"})),
        ] {
            let resolved = resolve(&local, &remote, &resolution, &ctx, Utc::now()).unwrap();
            assert!(resolved.vector_clock.dominates(&local.vector_clock));
            assert!(resolved.vector_clock.dominates(&remote.vector_clock));
            assert_eq!(resolved.version, 4);
            assert_eq!(resolved.sync_status, SyncStatus::Pending);
            assert_eq!(resolved.last_modified_by, "manager");
        }

        let taken = resolve(&local, &remote, &Resolution::TakeRemote, &ctx, Utc::now()).unwrap();
        assert_eq!(taken.data, remote.data);
        let merged = resolve(
            &local,
            &remote,
            &Resolution::Merged(json!({"slot": "merged"})),
            &ctx,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(merged.data["slot"], "merged");
    }

    #[test]
    fn test_resolve_requires_conflict() {
        let local = entity(VectorClock::from([("d1", 1)]), 1, "d1");
        let ctx = MutationContext::new("manager", "d1");
        assert!(resolve(&local, &local, &Resolution::KeepLocal, &ctx, Utc::now()).is_err());
    }

    #[test]
    fn test_last_writer_wins() {
        let local = entity(VectorClock::from([("d1", 3)]), 3, "d1");
        let remote = entity(VectorClock::from([("d2", 2)]), 2, "d2");
        assert_eq!(last_writer_wins(&local, &remote), Resolution::KeepLocal);
        assert_eq!(last_writer_wins(&remote, &local), Resolution::TakeRemote);

        // equal versions fall back to device id
        let remote = entity(VectorClock::from([("d2", 3)]), 3, "d2");
        assert_eq!(last_writer_wins(&local, &remote), Resolution::TakeRemote);
    }

    #[test]
    fn test_conflict_policy_from_str() {
        assert_eq!(
            ConflictPolicy::from_str("last-writer-wins").unwrap(),
            ConflictPolicy::LastWriterWins
        );
        assert_eq!(ConflictPolicy::from_str("Manual").unwrap(), ConflictPolicy::Manual);
        assert!(ConflictPolicy::from_str("newest").is_err());
    }
}
