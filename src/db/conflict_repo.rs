use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use uuid::Uuid;

use possync_core::{MutationContext, SyncableEntity};

use super::{format_ts, from_json, parse_opt_ts, parse_ts, to_json, DbError};

/// One detected conflict with both snapshots as they were when it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub local: SyncableEntity,
    pub remote: SyncableEntity,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_by_device: Option<String>,
}

impl ConflictRecord {
    pub fn new(local: SyncableEntity, remote: SyncableEntity, detected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: local.entity_type.clone(),
            entity_id: local.id.clone(),
            local,
            remote,
            detected_at,
            resolved_at: None,
            resolution: None,
            resolved_by: None,
            resolved_by_device: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

impl fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conflict {}", self.id)?;
        writeln!(f, "Entity:   {}/{}", self.entity_type, self.entity_id)?;
        writeln!(f, "Detected: {}", self.detected_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(
            f,
            "Local:    v{} {} by {}",
            self.local.version, self.local.vector_clock, self.local.last_modified_by_device
        )?;
        write!(
            f,
            "Remote:   v{} {} by {}",
            self.remote.version, self.remote.vector_clock, self.remote.last_modified_by_device
        )?;
        if let (Some(resolution), Some(resolved_at)) = (&self.resolution, self.resolved_at) {
            write!(
                f,
                "\nResolved: {} at {}",
                resolution,
                resolved_at.format("%Y-%m-%d %H:%M:%S")
            )?;
            if let Some(by) = &self.resolved_by {
                write!(f, " by {}", by)?;
            }
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    id: String,
    entity_type: String,
    entity_id: String,
    local_snapshot: String,
    remote_snapshot: String,
    detected_at: String,
    resolved_at: Option<String>,
    resolution: Option<String>,
    resolved_by: Option<String>,
    resolved_by_device: Option<String>,
}

impl ConflictRow {
    fn into_record(self) -> Result<ConflictRecord, DbError> {
        Ok(ConflictRecord {
            id: Uuid::parse_str(&self.id).map_err(|_| DbError::Id(self.id.clone()))?,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            local: from_json("local_snapshot", &self.local_snapshot)?,
            remote: from_json("remote_snapshot", &self.remote_snapshot)?,
            detected_at: parse_ts(&self.detected_at)?,
            resolved_at: parse_opt_ts(self.resolved_at.as_deref())?,
            resolution: self.resolution,
            resolved_by: self.resolved_by,
            resolved_by_device: self.resolved_by_device,
        })
    }
}

const CONFLICT_COLUMNS: &str = "id, entity_type, entity_id, local_snapshot, remote_snapshot, \
     detected_at, resolved_at, resolution, resolved_by, resolved_by_device";

#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) async fn insert_with(
        conn: &mut SqliteConnection,
        record: &ConflictRecord,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO sync_conflicts (id, entity_type, entity_id, local_snapshot, remote_snapshot,
                                        detected_at, resolved_at, resolution, resolved_by,
                                        resolved_by_device)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(to_json("local_snapshot", &record.local)?)
        .bind(to_json("remote_snapshot", &record.remote)?)
        .bind(format_ts(record.detected_at))
        .bind(record.resolved_at.map(format_ts))
        .bind(&record.resolution)
        .bind(&record.resolved_by)
        .bind(&record.resolved_by_device)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ConflictRecord>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with(&mut conn, id).await
    }

    pub(crate) async fn get_with(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<ConflictRecord>, DbError> {
        let row: Option<ConflictRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_conflicts WHERE id = ?",
            CONFLICT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(ConflictRow::into_record).transpose()
    }

    /// Unresolved conflicts for one entity, oldest first.
    pub(crate) async fn open_for_entity_with(
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ConflictRecord>, DbError> {
        let rows: Vec<ConflictRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_conflicts \
             WHERE entity_type = ? AND entity_id = ? AND resolved_at IS NULL \
             ORDER BY detected_at",
            CONFLICT_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&mut *conn)
        .await?;

        collect(rows)
    }

    pub async fn list(&self, open_only: bool) -> Result<Vec<ConflictRecord>, DbError> {
        let rows: Vec<ConflictRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_conflicts WHERE (? = 0 OR resolved_at IS NULL) \
             ORDER BY detected_at",
            CONFLICT_COLUMNS
        ))
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    pub async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ConflictRecord>, DbError> {
        let rows: Vec<ConflictRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_conflicts WHERE entity_type = ? AND entity_id = ? \
             ORDER BY detected_at",
            CONFLICT_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    /// Close an open conflict. Returns false if it was already resolved.
    pub(crate) async fn mark_resolved_with(
        conn: &mut SqliteConnection,
        id: Uuid,
        resolution: &str,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_conflicts
            SET resolved_at = ?, resolution = ?, resolved_by = ?, resolved_by_device = ?
            WHERE id = ? AND resolved_at IS NULL
            "#,
        )
        .bind(format_ts(now))
        .bind(resolution)
        .bind(&ctx.user_id)
        .bind(&ctx.device_id)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn collect(rows: Vec<ConflictRow>) -> Result<Vec<ConflictRecord>, DbError> {
    rows.into_iter().map(ConflictRow::into_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup;
    use chrono::Duration;
    use possync_core::VectorClock;
    use serde_json::json;

    fn snapshot(device: &str, clock: VectorClock) -> SyncableEntity {
        let ctx = MutationContext::new("user1", device);
        let mut entity =
            SyncableEntity::new("client", "c1", "tenant1", "store1", json!({"n": device}), &ctx);
        entity.vector_clock = clock;
        entity
    }

    fn record(detected_at: DateTime<Utc>) -> ConflictRecord {
        ConflictRecord::new(
            snapshot("a", VectorClock::from([("a", 2), ("b", 1)])),
            snapshot("b", VectorClock::from([("a", 1), ("b", 2)])),
            detected_at,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = setup().await;
        let repo = ConflictRepository::new(db.pool.clone());
        let conflict = record(Utc::now());

        let mut conn = db.pool.acquire().await.unwrap();
        ConflictRepository::insert_with(&mut conn, &conflict)
            .await
            .unwrap();
        drop(conn);

        let fetched = repo.get(conflict.id).await.unwrap().unwrap();
        assert_eq!(fetched.entity_type, "client");
        assert_eq!(fetched.entity_id, "c1");
        assert_eq!(fetched.local.vector_clock, conflict.local.vector_clock);
        assert_eq!(fetched.remote.data, json!({"n": "b"}));
        assert!(fetched.is_open());
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_closes_once() {
        let db = setup().await;
        let repo = ConflictRepository::new(db.pool.clone());
        let older = record(Utc::now() - Duration::minutes(5));
        let newer = record(Utc::now());
        let ctx = MutationContext::new("manager", "device-m");

        let mut conn = db.pool.acquire().await.unwrap();
        ConflictRepository::insert_with(&mut conn, &newer)
            .await
            .unwrap();
        ConflictRepository::insert_with(&mut conn, &older)
            .await
            .unwrap();

        let open = ConflictRepository::open_for_entity_with(&mut conn, "client", "c1")
            .await
            .unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, older.id);

        assert!(
            ConflictRepository::mark_resolved_with(&mut conn, older.id, "keep_local", &ctx, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !ConflictRepository::mark_resolved_with(&mut conn, older.id, "take_remote", &ctx, Utc::now())
                .await
                .unwrap()
        );
        drop(conn);

        let resolved = repo.get(older.id).await.unwrap().unwrap();
        assert_eq!(resolved.resolution.as_deref(), Some("keep_local"));
        assert_eq!(resolved.resolved_by.as_deref(), Some("manager"));
        assert_eq!(resolved.resolved_by_device.as_deref(), Some("device-m"));

        assert_eq!(repo.list(true).await.unwrap().len(), 1);
        assert_eq!(repo.list(false).await.unwrap().len(), 2);
        assert_eq!(repo.list_for_entity("client", "c1").await.unwrap().len(), 2);
        assert!(repo.list_for_entity("client", "c2").await.unwrap().is_empty());
    }
}
