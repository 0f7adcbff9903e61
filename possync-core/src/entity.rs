//! Sync fields embedded in every syncable entity.
//!
//! Local mutations bump `version` and record it under the writing device in
//! the vector clock. Deletes are soft: they set tombstone fields and travel
//! through the same versioned channel as any other change.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::VectorClock;
use crate::context::MutationContext;
use crate::error::SyncError;
use crate::status::{SyncEvent, SyncStatus};

pub const DEFAULT_TOMBSTONE_RETENTION_DAYS: i64 = 30;

/// Soft-delete marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub deleted_by_device: Option<String>,
    pub tombstone_expires_at: Option<DateTime<Utc>>,
}

impl Tombstone {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_deleted
            && self
                .tombstone_expires_at
                .is_some_and(|expires_at| expires_at <= now)
    }
}

/// A syncable entity snapshot: the entity's own fields in `data` plus the
/// versioning, audit and tombstone fields every synced entity carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncableEntity {
    pub entity_type: String,
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub data: serde_json::Value,
    pub version: u64,
    pub vector_clock: VectorClock,
    pub last_synced_version: Option<u64>,
    pub sync_status: SyncStatus,
    pub created_by: String,
    pub created_by_device: String,
    pub last_modified_by: String,
    pub last_modified_by_device: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub tombstone: Tombstone,
}

impl SyncableEntity {
    /// A freshly created entity: version 1, clock `{device: 1}`, status local.
    pub fn new(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        store_id: impl Into<String>,
        data: serde_json::Value,
        ctx: &MutationContext,
    ) -> Self {
        let now = Utc::now();
        let mut vector_clock = VectorClock::new();
        vector_clock.record(ctx.device_id.clone(), 1);

        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            tenant_id: tenant_id.into(),
            store_id: store_id.into(),
            data,
            version: 1,
            vector_clock,
            last_synced_version: None,
            sync_status: SyncStatus::Local,
            created_by: ctx.user_id.clone(),
            created_by_device: ctx.device_id.clone(),
            last_modified_by: ctx.user_id.clone(),
            last_modified_by_device: ctx.device_id.clone(),
            created_at: now,
            updated_at: now,
            tombstone: Tombstone::default(),
        }
    }

    /// `entity_type/id`, used in messages and logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.entity_type, self.id)
    }

    pub fn is_deleted(&self) -> bool {
        self.tombstone.is_deleted
    }

    /// True when the current version has not been confirmed by the remote side.
    pub fn has_unsynced_changes(&self) -> bool {
        self.last_synced_version != Some(self.version)
    }

    /// Bump version and vector clock for a change made through `ctx`.
    ///
    /// Rejected while the entity is in conflict.
    pub fn record_mutation(
        &mut self,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        if self.sync_status == SyncStatus::Conflict {
            return Err(SyncError::UnresolvedConflict(self.key()));
        }
        self.sync_status = self.sync_status.apply(SyncEvent::LocalMutation)?;
        self.version += 1;
        self.vector_clock.record(ctx.device_id.clone(), self.version);
        self.last_modified_by = ctx.user_id.clone();
        self.last_modified_by_device = ctx.device_id.clone();
        self.updated_at = now;
        Ok(())
    }

    /// Replace the entity's data as a versioned local change.
    pub fn update_data(
        &mut self,
        data: serde_json::Value,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        if self.is_deleted() {
            return Err(SyncError::Deleted(self.key()));
        }
        self.record_mutation(ctx, now)?;
        self.data = data;
        Ok(())
    }

    /// Mark the entity deleted. The tombstone is kept for `retention_days`
    /// so the delete can reach every replica before it is purged.
    pub fn soft_delete(
        &mut self,
        ctx: &MutationContext,
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        if self.is_deleted() {
            return Err(SyncError::AlreadyDeleted(self.key()));
        }
        self.record_mutation(ctx, now)?;
        self.tombstone = Tombstone {
            is_deleted: true,
            deleted_at: Some(now),
            deleted_by: Some(ctx.user_id.clone()),
            deleted_by_device: Some(ctx.device_id.clone()),
            tombstone_expires_at: Some(now + Duration::days(retention_days)),
        };
        Ok(())
    }

    pub fn restore(&mut self, ctx: &MutationContext, now: DateTime<Utc>) -> Result<(), SyncError> {
        if !self.is_deleted() {
            return Err(SyncError::NotDeleted(self.key()));
        }
        self.record_mutation(ctx, now)?;
        self.tombstone = Tombstone::default();
        Ok(())
    }

    /// A tombstone may be purged only once it has expired and the delete
    /// has been confirmed synced.
    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        self.tombstone.is_expired(now) && self.sync_status == SyncStatus::Synced
    }

    /// Record that `version` reached the remote side. A newer local change
    /// keeps the entity pending.
    pub fn confirm_synced(&mut self, version: u64) -> Result<bool, SyncError> {
        if version != self.version {
            return Ok(false);
        }
        self.sync_status = self.sync_status.apply(SyncEvent::DispatchSucceeded)?;
        self.last_synced_version = Some(version);
        Ok(true)
    }

    /// Full camelCase snapshot, the form carried in queue payloads.
    pub fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl fmt::Display for SyncableEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.key())?;
        writeln!(f, "{}", "=".repeat(30))?;
        writeln!(f, "Tenant/store: {}/{}", self.tenant_id, self.store_id)?;
        writeln!(f, "Version:      {}", self.version)?;
        writeln!(f, "Clock:        {}", self.vector_clock)?;
        match self.last_synced_version {
            Some(v) => writeln!(f, "Last synced:  {}", v)?,
            None => writeln!(f, "Last synced:  never")?,
        }
        writeln!(f, "Status:       {}", self.sync_status)?;
        writeln!(
            f,
            "Modified by:  {} ({})",
            self.last_modified_by, self.last_modified_by_device
        )?;
        if self.is_deleted() {
            if let Some(expires_at) = self.tombstone.tombstone_expires_at {
                writeln!(f, "Deleted:      yes (tombstone expires {})", expires_at)?;
            } else {
                writeln!(f, "Deleted:      yes")?;
            }
        }
        write!(f, "Data:         {}", self.data)
    }
}
