use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use possync_core::{SyncStatus, SyncableEntity, Tombstone};

use super::{format_ts, from_json, parse_opt_ts, parse_ts, to_db_int, to_json, DbError};

/// Local copies of syncable entities, tombstones included.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

const ENTITY_COLUMNS: &str = "entity_type, id, tenant_id, store_id, data, version, vector_clock, \
     last_synced_version, sync_status, created_by, created_by_device, last_modified_by, \
     last_modified_by_device, created_at, updated_at, is_deleted, deleted_at, deleted_by, \
     deleted_by_device, tombstone_expires_at";

#[derive(sqlx::FromRow)]
struct EntityRow {
    entity_type: String,
    id: String,
    tenant_id: String,
    store_id: String,
    data: String,
    version: i64,
    vector_clock: String,
    last_synced_version: Option<i64>,
    sync_status: String,
    created_by: String,
    created_by_device: String,
    last_modified_by: String,
    last_modified_by_device: String,
    created_at: String,
    updated_at: String,
    is_deleted: bool,
    deleted_at: Option<String>,
    deleted_by: Option<String>,
    deleted_by_device: Option<String>,
    tombstone_expires_at: Option<String>,
}

impl EntityRow {
    fn into_entity(self) -> Result<SyncableEntity, DbError> {
        Ok(SyncableEntity {
            entity_type: self.entity_type,
            id: self.id,
            tenant_id: self.tenant_id,
            store_id: self.store_id,
            data: from_json("data", &self.data)?,
            version: self.version.max(0) as u64,
            vector_clock: from_json("vector_clock", &self.vector_clock)?,
            last_synced_version: self.last_synced_version.map(|v| v.max(0) as u64),
            sync_status: self.sync_status.parse()?,
            created_by: self.created_by,
            created_by_device: self.created_by_device,
            last_modified_by: self.last_modified_by,
            last_modified_by_device: self.last_modified_by_device,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            tombstone: Tombstone {
                is_deleted: self.is_deleted,
                deleted_at: parse_opt_ts(self.deleted_at.as_deref())?,
                deleted_by: self.deleted_by,
                deleted_by_device: self.deleted_by_device,
                tombstone_expires_at: parse_opt_ts(self.tombstone_expires_at.as_deref())?,
            },
        })
    }
}

impl EntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<SyncableEntity>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with(&mut conn, entity_type, id).await
    }

    pub(crate) async fn get_with(
        conn: &mut SqliteConnection,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<SyncableEntity>, DbError> {
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM synced_entities WHERE entity_type = ? AND id = ?",
            ENTITY_COLUMNS
        ))
        .bind(entity_type)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    pub async fn upsert(&self, entity: &SyncableEntity) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_with(&mut conn, entity).await
    }

    /// Insert or replace the stored copy of `entity`.
    pub(crate) async fn upsert_with(
        conn: &mut SqliteConnection,
        entity: &SyncableEntity,
    ) -> Result<(), DbError> {
        let tombstone = &entity.tombstone;

        sqlx::query(
            r#"
            INSERT INTO synced_entities (entity_type, id, tenant_id, store_id, data, version,
                vector_clock, last_synced_version, sync_status, created_by, created_by_device,
                last_modified_by, last_modified_by_device, created_at, updated_at, is_deleted,
                deleted_at, deleted_by, deleted_by_device, tombstone_expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_type, id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                store_id = excluded.store_id,
                data = excluded.data,
                version = excluded.version,
                vector_clock = excluded.vector_clock,
                last_synced_version = excluded.last_synced_version,
                sync_status = excluded.sync_status,
                created_by = excluded.created_by,
                created_by_device = excluded.created_by_device,
                last_modified_by = excluded.last_modified_by,
                last_modified_by_device = excluded.last_modified_by_device,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                is_deleted = excluded.is_deleted,
                deleted_at = excluded.deleted_at,
                deleted_by = excluded.deleted_by,
                deleted_by_device = excluded.deleted_by_device,
                tombstone_expires_at = excluded.tombstone_expires_at
            "#,
        )
        .bind(&entity.entity_type)
        .bind(&entity.id)
        .bind(&entity.tenant_id)
        .bind(&entity.store_id)
        .bind(to_json("data", &entity.data)?)
        .bind(to_db_int(entity.version)?)
        .bind(to_json("vector_clock", &entity.vector_clock)?)
        .bind(entity.last_synced_version.map(to_db_int).transpose()?)
        .bind(entity.sync_status.to_string())
        .bind(&entity.created_by)
        .bind(&entity.created_by_device)
        .bind(&entity.last_modified_by)
        .bind(&entity.last_modified_by_device)
        .bind(format_ts(entity.created_at))
        .bind(format_ts(entity.updated_at))
        .bind(tombstone.is_deleted)
        .bind(tombstone.deleted_at.map(format_ts))
        .bind(&tombstone.deleted_by)
        .bind(&tombstone.deleted_by_device)
        .bind(tombstone.tombstone_expires_at.map(format_ts))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Entities ordered by type and id. Tombstoned rows are left out unless
    /// `include_deleted` is set.
    pub async fn list(
        &self,
        entity_type: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<SyncableEntity>, DbError> {
        let rows: Vec<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM synced_entities \
             WHERE (? IS NULL OR entity_type = ?) AND (? OR is_deleted = 0) \
             ORDER BY entity_type, id",
            ENTITY_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_type)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    pub async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SyncableEntity>, DbError> {
        let rows: Vec<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM synced_entities WHERE sync_status = ? ORDER BY entity_type, id",
            ENTITY_COLUMNS
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    /// Soft-deleted entities in `store_id`, soonest expiry first.
    pub async fn list_tombstones(&self, store_id: &str) -> Result<Vec<SyncableEntity>, DbError> {
        let rows: Vec<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM synced_entities WHERE store_id = ? AND is_deleted = 1 \
             ORDER BY tombstone_expires_at, entity_type, id",
            ENTITY_COLUMNS
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    /// Hard-delete tombstones in `store_id` that expired at or before `now`
    /// and whose delete has been confirmed synced. Returns the purged keys.
    pub async fn delete_purgeable(
        &self,
        store_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, DbError> {
        let purged: Vec<(String, String)> = sqlx::query_as(
            r#"
            DELETE FROM synced_entities
            WHERE store_id = ? AND is_deleted = 1 AND sync_status = 'synced'
              AND tombstone_expires_at IS NOT NULL AND tombstone_expires_at <= ?
            RETURNING entity_type, id
            "#,
        )
        .bind(store_id)
        .bind(format_ts(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(purged
            .into_iter()
            .map(|(entity_type, id)| format!("{}/{}", entity_type, id))
            .collect())
    }
}

fn collect(rows: Vec<EntityRow>) -> Result<Vec<SyncableEntity>, DbError> {
    rows.into_iter().map(EntityRow::into_entity).collect()
}
