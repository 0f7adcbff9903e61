//! Collaborator-facing sync facade.
//!
//! Every local mutation writes the entity row and its queue row in one
//! transaction. Remote snapshots are classified against the stored copy and
//! conflicts are recorded before anything is overwritten.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use possync_core::{
    last_writer_wins, reconcile, resolve, Classification, ConflictPolicy, MutationContext,
    OperationKind, Priority, RemoteOutcome, Resolution, SyncError, SyncEvent, SyncOperation,
    SyncStatus, SyncableEntity,
};

use crate::config::SyncConfig;
use crate::db::{
    ConflictRecord, ConflictRepository, DbError, EntityRepository, QueueError, SyncQueue,
};

/// Error type for sync service operations.
#[derive(Debug)]
pub enum ServiceError {
    /// Entity not found.
    NotFound(String),
    /// Entity already exists.
    AlreadyExists(String),
    /// Conflict record not found.
    ConflictNotFound(Uuid),
    /// Conflict record already closed.
    ConflictAlreadyResolved(Uuid),
    /// Invalid state change on an entity.
    Sync(SyncError),
    /// Local storage error.
    Db(DbError),
    /// Queue error.
    Queue(QueueError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::NotFound(key) => write!(f, "Entity not found: {}", key),
            ServiceError::AlreadyExists(key) => write!(f, "Entity already exists: {}", key),
            ServiceError::ConflictNotFound(id) => write!(f, "Conflict not found: {}", id),
            ServiceError::ConflictAlreadyResolved(id) => {
                write!(f, "Conflict {} is already resolved", id)
            }
            ServiceError::Sync(e) => write!(f, "{}", e),
            ServiceError::Db(e) => write!(f, "{}", e),
            ServiceError::Queue(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<SyncError> for ServiceError {
    fn from(e: SyncError) -> Self {
        ServiceError::Sync(e)
    }
}

impl From<DbError> for ServiceError {
    fn from(e: DbError) -> Self {
        ServiceError::Db(e)
    }
}

impl From<QueueError> for ServiceError {
    fn from(e: QueueError) -> Self {
        ServiceError::Queue(e)
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Db(DbError::Sqlx(e))
    }
}

/// What happened to a remote snapshot.
#[derive(Debug, Clone)]
pub struct RemoteApplied {
    pub classification: Classification,
    /// The entity as now stored locally.
    pub entity: SyncableEntity,
    /// Set when a conflict was recorded.
    pub conflict_id: Option<Uuid>,
    /// True when the conflict was settled by last-writer-wins.
    pub auto_resolved: bool,
}

#[derive(Debug, Clone)]
pub struct SyncService {
    pool: SqlitePool,
    queue: SyncQueue,
    entities: EntityRepository,
    conflicts: ConflictRepository,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(pool: SqlitePool, config: SyncConfig) -> Self {
        Self {
            queue: SyncQueue::new(pool.clone()),
            entities: EntityRepository::new(pool.clone()),
            conflicts: ConflictRepository::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Operations enqueued through the returned service use `priority`.
    pub fn with_priority(&self, priority: Priority) -> Self {
        let mut service = self.clone();
        service.config.default_priority = priority;
        service
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn entities(&self) -> &EntityRepository {
        &self.entities
    }

    pub fn conflicts(&self) -> &ConflictRepository {
        &self.conflicts
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn operation_for(
        &self,
        entity: &SyncableEntity,
        kind: OperationKind,
    ) -> Result<SyncOperation, DbError> {
        let payload = entity.snapshot().map_err(|source| DbError::Json {
            column: "payload",
            source,
        })?;
        Ok(SyncOperation::new(&entity.entity_type, &entity.id, kind, payload)
            .with_priority(self.config.default_priority)
            .with_max_retries(self.config.max_retries))
    }

    async fn write_and_enqueue(
        &self,
        conn: &mut SqliteConnection,
        entity: &SyncableEntity,
        kind: OperationKind,
    ) -> Result<SyncOperation, ServiceError> {
        EntityRepository::upsert_with(conn, entity).await?;
        let op = SyncQueue::insert_with(conn, self.operation_for(entity, kind)?).await?;
        Ok(op)
    }

    /// Create a new entity at version 1 and queue its create operation.
    pub async fn create(
        &self,
        entity_type: &str,
        id: &str,
        tenant_id: &str,
        store_id: &str,
        data: serde_json::Value,
        ctx: &MutationContext,
    ) -> Result<SyncableEntity, ServiceError> {
        let mut tx = self.pool.begin().await?;

        if EntityRepository::get_with(&mut *tx, entity_type, id)
            .await?
            .is_some()
        {
            return Err(ServiceError::AlreadyExists(format!("{}/{}", entity_type, id)));
        }

        let mut entity = SyncableEntity::new(entity_type, id, tenant_id, store_id, data, ctx);
        entity.sync_status = entity.sync_status.apply(SyncEvent::Enqueued)?;
        let op = self
            .write_and_enqueue(&mut *tx, &entity, OperationKind::Create)
            .await?;

        tx.commit().await?;

        tracing::info!("Created {} (operation {})", entity.key(), op.id);
        Ok(entity)
    }

    /// Load an entity, apply `change` and queue the result, all in one
    /// transaction.
    async fn mutate<F>(
        &self,
        entity_type: &str,
        id: &str,
        kind: OperationKind,
        change: F,
    ) -> Result<SyncableEntity, ServiceError>
    where
        F: FnOnce(&mut SyncableEntity) -> Result<(), SyncError>,
    {
        let mut tx = self.pool.begin().await?;

        let mut entity = EntityRepository::get_with(&mut *tx, entity_type, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("{}/{}", entity_type, id)))?;

        change(&mut entity)?;
        let op = self.write_and_enqueue(&mut *tx, &entity, kind).await?;

        tx.commit().await?;

        tracing::info!(
            "Queued {} of {} at version {} (operation {})",
            kind,
            entity.key(),
            entity.version,
            op.id
        );
        Ok(entity)
    }

    pub async fn update(
        &self,
        entity_type: &str,
        id: &str,
        data: serde_json::Value,
        ctx: &MutationContext,
    ) -> Result<SyncableEntity, ServiceError> {
        self.update_at(entity_type, id, data, ctx, Utc::now()).await
    }

    pub async fn update_at(
        &self,
        entity_type: &str,
        id: &str,
        data: serde_json::Value,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<SyncableEntity, ServiceError> {
        self.mutate(entity_type, id, OperationKind::Update, |entity| {
            entity.update_data(data, ctx, now)
        })
        .await
    }

    /// Tombstone an entity for the configured retention period.
    pub async fn soft_delete(
        &self,
        entity_type: &str,
        id: &str,
        ctx: &MutationContext,
    ) -> Result<SyncableEntity, ServiceError> {
        self.soft_delete_at(entity_type, id, ctx, Utc::now()).await
    }

    pub async fn soft_delete_at(
        &self,
        entity_type: &str,
        id: &str,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<SyncableEntity, ServiceError> {
        let retention_days = self.config.tombstone_retention_days;
        self.mutate(entity_type, id, OperationKind::Delete, |entity| {
            entity.soft_delete(ctx, retention_days, now)
        })
        .await
    }

    pub async fn restore(
        &self,
        entity_type: &str,
        id: &str,
        ctx: &MutationContext,
    ) -> Result<SyncableEntity, ServiceError> {
        let now = Utc::now();
        self.mutate(entity_type, id, OperationKind::Update, |entity| {
            entity.restore(ctx, now)
        })
        .await
    }

    /// Hard-delete expired tombstones of `store_id` whose delete has been
    /// confirmed synced. Returns the number removed.
    pub async fn cleanup_expired_tombstones(&self, store_id: &str) -> Result<usize, ServiceError> {
        self.cleanup_expired_tombstones_at(store_id, Utc::now())
            .await
    }

    pub async fn cleanup_expired_tombstones_at(
        &self,
        store_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, ServiceError> {
        let purged = self.entities.delete_purgeable(store_id, now).await?;
        for key in &purged {
            tracing::debug!("Purged tombstone {}", key);
        }
        if !purged.is_empty() {
            tracing::info!(
                "Removed {} expired tombstone(s) from store {}",
                purged.len(),
                store_id
            );
        }
        Ok(purged.len())
    }

    /// Apply a snapshot received from the remote side. `ctx` identifies this
    /// device when a conflict is settled automatically.
    pub async fn receive_remote(
        &self,
        remote: SyncableEntity,
        ctx: &MutationContext,
    ) -> Result<RemoteApplied, ServiceError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let local = EntityRepository::get_with(&mut *tx, &remote.entity_type, &remote.id).await?;
        let outcome = reconcile(local, remote)?;
        let classification = outcome.classification();

        let applied = match outcome {
            RemoteOutcome::Accepted(entity) => {
                EntityRepository::upsert_with(&mut *tx, &entity).await?;
                // a dominating snapshot already contains whatever settled them
                let open = ConflictRepository::open_for_entity_with(
                    &mut *tx,
                    &entity.entity_type,
                    &entity.id,
                )
                .await?;
                for record in &open {
                    ConflictRepository::mark_resolved_with(
                        &mut *tx,
                        record.id,
                        "superseded",
                        ctx,
                        now,
                    )
                    .await?;
                }
                tracing::info!("Accepted remote {} at version {}", entity.key(), entity.version);
                RemoteApplied {
                    classification,
                    entity,
                    conflict_id: None,
                    auto_resolved: false,
                }
            }
            RemoteOutcome::Ignored(entity) | RemoteOutcome::AlreadySynced(entity) => {
                EntityRepository::upsert_with(&mut *tx, &entity).await?;
                tracing::debug!("Remote {} is not newer ({})", entity.key(), classification);
                RemoteApplied {
                    classification,
                    entity,
                    conflict_id: None,
                    auto_resolved: false,
                }
            }
            RemoteOutcome::Conflict { mut local, remote } => {
                let record = ConflictRecord::new(local.clone(), remote.clone(), now);
                ConflictRepository::insert_with(&mut *tx, &record).await?;
                tracing::warn!(
                    "Conflict on {}: local {} vs remote {} (conflict {})",
                    local.key(),
                    local.vector_clock,
                    remote.vector_clock,
                    record.id
                );

                match self.config.conflict_policy {
                    ConflictPolicy::Manual => {
                        EntityRepository::upsert_with(&mut *tx, &local).await?;
                        RemoteApplied {
                            classification,
                            entity: local,
                            conflict_id: Some(record.id),
                            auto_resolved: false,
                        }
                    }
                    ConflictPolicy::LastWriterWins => {
                        let resolution = last_writer_wins(&local, &remote);
                        let others = other_open_conflicts(&mut *tx, &record).await?;
                        fold_into(&mut local, &others);
                        let resolved = resolve(&local, &remote, &resolution, ctx, now)?;
                        self.write_and_enqueue(&mut *tx, &resolved, OperationKind::Update)
                            .await?;
                        ConflictRepository::mark_resolved_with(
                            &mut *tx,
                            record.id,
                            "last_writer_wins",
                            ctx,
                            now,
                        )
                        .await?;
                        for other in &others {
                            ConflictRepository::mark_resolved_with(
                                &mut *tx,
                                other.id,
                                "superseded",
                                ctx,
                                now,
                            )
                            .await?;
                        }
                        tracing::info!(
                            "Resolved conflict {} by last writer wins ({})",
                            record.id,
                            resolution.name()
                        );
                        RemoteApplied {
                            classification,
                            entity: resolved,
                            conflict_id: Some(record.id),
                            auto_resolved: true,
                        }
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(applied)
    }

    /// Settle an open conflict. Other open conflicts on the same entity are
    /// folded into the resolution and closed as superseded.
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        resolution: Resolution,
        ctx: &MutationContext,
    ) -> Result<SyncableEntity, ServiceError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let record = ConflictRepository::get_with(&mut *tx, conflict_id)
            .await?
            .ok_or(ServiceError::ConflictNotFound(conflict_id))?;
        if !record.is_open() {
            return Err(ServiceError::ConflictAlreadyResolved(conflict_id));
        }

        let mut local =
            EntityRepository::get_with(&mut *tx, &record.entity_type, &record.entity_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("{}/{}", record.entity_type, record.entity_id))
                })?;

        let others = other_open_conflicts(&mut *tx, &record).await?;
        fold_into(&mut local, &others);

        let resolved = resolve(&local, &record.remote, &resolution, ctx, now)?;
        let op = self
            .write_and_enqueue(&mut *tx, &resolved, OperationKind::Update)
            .await?;

        ConflictRepository::mark_resolved_with(&mut *tx, record.id, resolution.name(), ctx, now)
            .await?;
        for other in &others {
            ConflictRepository::mark_resolved_with(&mut *tx, other.id, "superseded", ctx, now)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Resolved conflict {} on {} ({}), queued operation {}",
            conflict_id,
            resolved.key(),
            resolution.name(),
            op.id
        );
        Ok(resolved)
    }

    pub async fn list_conflicts(&self, open_only: bool) -> Result<Vec<ConflictRecord>, ServiceError> {
        Ok(self.conflicts.list(open_only).await?)
    }

    /// Feed a dispatch result back to the entity the operation carries.
    ///
    /// Applies only when the operation's payload is the entity's current
    /// version; older payloads leave a newer pending change untouched.
    /// Returns whether the entity changed.
    pub async fn apply_dispatch_event(
        &self,
        op: &SyncOperation,
        event: SyncEvent,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let Some(mut entity) =
            EntityRepository::get_with(&mut *tx, &op.entity_type, &op.entity_id).await?
        else {
            return Ok(false);
        };

        if op.payload_version() != Some(entity.version) {
            tracing::debug!(
                "Operation {} carries an older version of {}; status left at {}",
                op.id,
                entity.key(),
                entity.sync_status
            );
            return Ok(false);
        }

        let result = match event {
            SyncEvent::DispatchSucceeded => entity.confirm_synced(entity.version).map(|_| ()),
            _ => entity
                .sync_status
                .apply(event)
                .map(|next| entity.sync_status = next),
        };
        if let Err(e) = result {
            tracing::debug!("Skipping status update for {}: {}", entity.key(), e);
            return Ok(false);
        }

        EntityRepository::upsert_with(&mut *tx, &entity).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Reset a failed operation and move its entity out of error.
    pub async fn retry_failed(&self, op_id: Uuid) -> Result<SyncOperation, ServiceError> {
        let op = self.queue.reset_for_retry(op_id).await?;
        self.apply_dispatch_event(&op, SyncEvent::RetryRequested)
            .await?;
        Ok(op)
    }

    /// Entities currently waiting on an operator decision.
    pub async fn conflicted_entities(&self) -> Result<Vec<SyncableEntity>, ServiceError> {
        Ok(self.entities.list_by_status(SyncStatus::Conflict).await?)
    }
}

/// Open conflicts on the same entity as `record`, excluding it.
async fn other_open_conflicts(
    conn: &mut SqliteConnection,
    record: &ConflictRecord,
) -> Result<Vec<ConflictRecord>, DbError> {
    Ok(
        ConflictRepository::open_for_entity_with(conn, &record.entity_type, &record.entity_id)
            .await?
            .into_iter()
            .filter(|other| other.id != record.id)
            .collect(),
    )
}

/// Fold the remote sides of `others` into `local` so a resolution built on
/// it dominates every one of them.
fn fold_into(local: &mut SyncableEntity, others: &[ConflictRecord]) {
    for other in others {
        local.vector_clock = local.vector_clock.merge(&other.remote.vector_clock);
        local.version = local.version.max(other.remote.version);
    }
}
