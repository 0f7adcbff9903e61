//! Durable, priority-ordered queue of pending sync operations.
//!
//! Operations drain by priority (1 before 2 before 3) and then in creation
//! order. Status changes are single conditional UPDATE statements so a row
//! never ends up half-transitioned.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use possync_core::{OperationStatus, Priority, SyncError, SyncOperation};

use super::{format_ts, from_json, parse_opt_ts, parse_ts, to_json, DbError};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Sync operation not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] SyncError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Db(DbError::Sqlx(e))
    }
}

/// Operation counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub syncing: i64,
    pub complete: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.syncing + self.complete + self.failed
    }

    pub fn count(&self, status: OperationStatus) -> i64 {
        match status {
            OperationStatus::Pending => self.pending,
            OperationStatus::Syncing => self.syncing,
            OperationStatus::Complete => self.complete,
            OperationStatus::Failed => self.failed,
        }
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pending:  {}", self.pending)?;
        writeln!(f, "syncing:  {}", self.syncing)?;
        writeln!(f, "complete: {}", self.complete)?;
        write!(f, "failed:   {}", self.failed)
    }
}

const OPERATION_COLUMNS: &str = "id, entity_type, entity_id, operation_kind, payload, priority, \
     status, error_message, retry_count, max_retries, created_at, updated_at, completed_at";

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    entity_type: String,
    entity_id: String,
    operation_kind: String,
    payload: String,
    priority: i64,
    status: String,
    error_message: Option<String>,
    retry_count: i64,
    max_retries: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl OperationRow {
    fn into_operation(self) -> Result<SyncOperation, DbError> {
        Ok(SyncOperation {
            id: Uuid::parse_str(&self.id).map_err(|_| DbError::Id(self.id.clone()))?,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            kind: self.operation_kind.parse()?,
            payload: from_json("payload", &self.payload)?,
            priority: Priority::try_from(self.priority)?,
            status: self.status.parse()?,
            error_message: self.error_message,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: parse_opt_ts(self.completed_at.as_deref())?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncQueue {
    pool: SqlitePool,
}

impl SyncQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue `op` as a fresh pending operation. Nothing is transmitted.
    pub async fn enqueue(&self, op: SyncOperation) -> Result<SyncOperation, QueueError> {
        let mut conn = self.pool.acquire().await?;
        let op = Self::insert_with(&mut conn, op).await?;
        Ok(op)
    }

    /// Insert on an existing connection or transaction, so the entity write
    /// and its queue row commit together.
    pub(crate) async fn insert_with(
        conn: &mut SqliteConnection,
        mut op: SyncOperation,
    ) -> Result<SyncOperation, DbError> {
        op.status = OperationStatus::Pending;
        op.retry_count = 0;
        op.error_message = None;
        op.completed_at = None;

        sqlx::query(
            r#"
            INSERT INTO sync_queue (id, entity_type, entity_id, operation_kind, payload, priority,
                                    status, retry_count, max_retries, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(op.id.to_string())
        .bind(&op.entity_type)
        .bind(&op.entity_id)
        .bind(op.kind.to_string())
        .bind(to_json("payload", &op.payload)?)
        .bind(op.priority.as_i64())
        .bind(i64::from(op.max_retries))
        .bind(format_ts(op.created_at))
        .bind(format_ts(op.updated_at))
        .execute(&mut *conn)
        .await?;

        tracing::debug!(
            "Enqueued {} {}/{} ({}, priority {})",
            op.kind,
            op.entity_type,
            op.entity_id,
            op.id,
            op.priority.as_i64()
        );
        Ok(op)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SyncOperation>, QueueError> {
        let row: Option<OperationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_queue WHERE id = ?",
            OPERATION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OperationRow::into_operation).transpose()?)
    }

    async fn require(&self, id: Uuid) -> Result<SyncOperation, QueueError> {
        self.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// Up to `limit` pending operations, highest priority first, FIFO within
    /// a priority. Does not claim them; see [`SyncQueue::mark_syncing`].
    pub async fn dequeue_next(&self, limit: u32) -> Result<Vec<SyncOperation>, QueueError> {
        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_queue WHERE status = 'pending' \
             ORDER BY priority ASC, created_at ASC, seq ASC LIMIT ?",
            OPERATION_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    /// Claim a pending operation for dispatch. Returns false, leaving the row
    /// untouched, if it is not currently pending.
    pub async fn mark_syncing(&self, id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'syncing', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(format_ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let op = self.require(id).await?;
            tracing::debug!("Operation {} not claimed, status is {}", id, op.status);
            return Ok(false);
        }
        Ok(true)
    }

    /// Completing an already complete operation is a no-op.
    pub async fn mark_complete(&self, id: Uuid) -> Result<SyncOperation, QueueError> {
        let op = self.require(id).await?;
        if op.status == OperationStatus::Complete {
            return Ok(op);
        }
        op.status.transition(OperationStatus::Complete)?;

        let now = format_ts(Utc::now());
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'complete', error_message = NULL, completed_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'syncing')
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Operation {} complete", id);
        self.require(id).await
    }

    /// Record a failed attempt. The operation goes back to pending until the
    /// retry budget is spent, then becomes failed until reset.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
    ) -> Result<SyncOperation, QueueError> {
        let op = self.require(id).await?;
        if !op.status.can_transition_to(OperationStatus::Failed) {
            return Err(SyncError::InvalidOperationTransition {
                from: op.status,
                to: OperationStatus::Failed,
            }
            .into());
        }

        let now = format_ts(Utc::now());
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET retry_count = retry_count + 1,
                error_message = ?,
                status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
                completed_at = CASE WHEN retry_count + 1 >= max_retries THEN ? ELSE NULL END,
                updated_at = ?
            WHERE id = ? AND status IN ('pending', 'syncing')
            "#,
        )
        .bind(error_message)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        let op = self.require(id).await?;
        if op.status == OperationStatus::Failed {
            tracing::warn!(
                "Operation {} for {}/{} failed after {} attempts: {}",
                id,
                op.entity_type,
                op.entity_id,
                op.retry_count,
                error_message
            );
        } else {
            tracing::info!(
                "Operation {} attempt {}/{} failed, will retry: {}",
                id,
                op.retry_count,
                op.max_retries,
                error_message
            );
        }
        Ok(op)
    }

    /// Put a failed operation back in the queue with a fresh retry budget.
    pub async fn reset_for_retry(&self, id: Uuid) -> Result<SyncOperation, QueueError> {
        let op = self.require(id).await?;
        if op.status != OperationStatus::Failed {
            return Err(SyncError::InvalidOperationTransition {
                from: op.status,
                to: OperationStatus::Pending,
            }
            .into());
        }

        sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'pending', retry_count = 0, error_message = NULL,
                completed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(format_ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        tracing::info!("Operation {} reset for retry", id);
        self.require(id).await
    }

    /// Remove an operation that has not been claimed yet.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ? AND status = 'pending'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            self.require(id).await?;
            return Ok(false);
        }
        tracing::info!("Operation {} cancelled", id);
        Ok(true)
    }

    /// Return operations stuck in syncing for longer than `timeout` to
    /// pending. Their retry count is left alone.
    pub async fn reclaim_stale(&self, timeout: Duration) -> Result<u64, QueueError> {
        self.reclaim_stale_at(timeout, Utc::now()).await
    }

    pub async fn reclaim_stale_at(
        &self,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let cutoff = format_ts(now - timeout);
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'pending', updated_at = ? WHERE status = 'syncing' AND updated_at < ?",
        )
        .bind(format_ts(now))
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::warn!(
                "Reclaimed {} operation(s) stuck in syncing since before {}",
                reclaimed,
                cutoff
            );
        }
        Ok(reclaimed)
    }

    /// Delete complete operations finished before `older_than`.
    pub async fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "DELETE FROM sync_queue WHERE status = 'complete' AND completed_at < ?",
        )
        .bind(format_ts(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<SyncOperation>, QueueError> {
        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_queue WHERE entity_type = ? AND entity_id = ? ORDER BY created_at, seq",
            OPERATION_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    pub async fn by_entity_id(&self, entity_id: &str) -> Result<Vec<SyncOperation>, QueueError> {
        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_queue WHERE entity_id = ? ORDER BY created_at, seq",
            OPERATION_COLUMNS
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    pub async fn by_status(
        &self,
        status: OperationStatus,
    ) -> Result<Vec<SyncOperation>, QueueError> {
        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_queue WHERE status = ? ORDER BY priority, created_at, seq",
            OPERATION_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.parse::<OperationStatus>()? {
                OperationStatus::Pending => stats.pending = count,
                OperationStatus::Syncing => stats.syncing = count,
                OperationStatus::Complete => stats.complete = count,
                OperationStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    /// Creation time of the oldest pending operation, for staleness alarms.
    pub async fn oldest_pending_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT MIN(created_at) FROM sync_queue WHERE status = 'pending'")
                .fetch_optional(&self.pool)
                .await?;

        let oldest = row.and_then(|(ts,)| ts);
        Ok(parse_opt_ts(oldest.as_deref())?)
    }
}

fn collect(rows: Vec<OperationRow>) -> Result<Vec<SyncOperation>, QueueError> {
    rows.into_iter()
        .map(|row| row.into_operation().map_err(QueueError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{setup, TestDb};
    use possync_core::OperationKind;
    use serde_json::json;

    async fn queue() -> (SyncQueue, TestDb) {
        let db = setup().await;
        (SyncQueue::new(db.pool.clone()), db)
    }

    fn op(entity_id: &str, priority: Priority) -> SyncOperation {
        SyncOperation::new(
            "client",
            entity_id,
            OperationKind::Update,
            json!({"id": entity_id}),
        )
        .with_priority(priority)
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_operation() {
        let (queue, _db) = queue().await;

        let queued = queue.enqueue(op("c1", Priority::High)).await.unwrap();
        let fetched = queue.get(queued.id).await.unwrap().unwrap();

        assert_eq!(fetched.status, OperationStatus::Pending);
        assert_eq!(fetched.retry_count, 0);
        assert_eq!(fetched.max_retries, 3);
        assert_eq!(fetched.priority, Priority::High);
        assert_eq!(fetched.payload, json!({"id": "c1"}));
        assert!(fetched.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_high_priority_jumps_queue() {
        let (queue, _db) = queue().await;

        for i in 0..5 {
            queue
                .enqueue(op(&format!("m{}", i), Priority::Medium))
                .await
                .unwrap();
        }
        let urgent = queue
            .enqueue(
                SyncOperation::new("client", "c1", OperationKind::Update, json!({"name": "Jane"}))
                    .with_priority(Priority::High),
            )
            .await
            .unwrap();

        let batch = queue.dequeue_next(10).await.unwrap();
        assert_eq!(batch.len(), 6);
        assert_eq!(batch[0].id, urgent.id);
        let rest: Vec<&str> = batch[1..].iter().map(|o| o.entity_id.as_str()).collect();
        assert_eq!(rest, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_priority_beats_creation_time() {
        let (queue, _db) = queue().await;
        let base = Utc::now() - Duration::hours(1);

        let mut low = op("low", Priority::Low);
        low.created_at = base;
        let mut medium = op("medium", Priority::Medium);
        medium.created_at = base + Duration::minutes(1);
        let mut high = op("high", Priority::High);
        high.created_at = base + Duration::minutes(2);

        queue.enqueue(low).await.unwrap();
        queue.enqueue(medium).await.unwrap();
        queue.enqueue(high).await.unwrap();

        let order: Vec<String> = queue
            .dequeue_next(10)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.entity_id)
            .collect();
        assert_eq!(order, vec!["high", "medium", "low"]);
    }

    #[tokio::test]
    async fn test_equal_priority_is_fifo_even_with_same_timestamp() {
        let (queue, _db) = queue().await;
        let at = Utc::now();

        for id in ["a", "b", "c"] {
            let mut o = op(id, Priority::Medium);
            o.created_at = at;
            queue.enqueue(o).await.unwrap();
        }

        let order: Vec<String> = queue
            .dequeue_next(2)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.entity_id)
            .collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dequeue_skips_non_pending() {
        let (queue, _db) = queue().await;
        let first = queue.enqueue(op("a", Priority::Medium)).await.unwrap();
        queue.enqueue(op("b", Priority::Medium)).await.unwrap();

        assert!(queue.mark_syncing(first.id).await.unwrap());

        let batch = queue.dequeue_next(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].entity_id, "b");
    }

    #[tokio::test]
    async fn test_mark_syncing_is_guarded() {
        let (queue, _db) = queue().await;
        let queued = queue.enqueue(op("a", Priority::Medium)).await.unwrap();

        assert!(queue.mark_syncing(queued.id).await.unwrap());
        let claimed = queue.get(queued.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, OperationStatus::Syncing);

        // second claim is a no-op
        assert!(!queue.mark_syncing(queued.id).await.unwrap());
        let again = queue.get(queued.id).await.unwrap().unwrap();
        assert_eq!(again.status, OperationStatus::Syncing);
        assert_eq!(again.updated_at, claimed.updated_at);

        queue.mark_complete(queued.id).await.unwrap();
        let complete = queue.get(queued.id).await.unwrap().unwrap();
        assert!(!queue.mark_syncing(queued.id).await.unwrap());
        let after = queue.get(queued.id).await.unwrap().unwrap();
        assert_eq!(after.status, OperationStatus::Complete);
        assert_eq!(after.updated_at, complete.updated_at);
    }

    #[tokio::test]
    async fn test_mark_syncing_unknown_id() {
        let (queue, _db) = queue().await;
        let result = queue.mark_syncing(Uuid::new_v4()).await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_complete() {
        let (queue, _db) = queue().await;
        let queued = queue.enqueue(op("a", Priority::Medium)).await.unwrap();
        queue.mark_syncing(queued.id).await.unwrap();

        let done = queue.mark_complete(queued.id).await.unwrap();
        assert_eq!(done.status, OperationStatus::Complete);
        assert!(done.completed_at.is_some());

        // repeat is a no-op
        let again = queue.mark_complete(queued.id).await.unwrap();
        assert_eq!(again.completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn test_mark_failed_retries_then_fails() {
        let (queue, _db) = queue().await;
        let queued = queue.enqueue(op("a", Priority::Medium)).await.unwrap();

        for attempt in 1..=2 {
            queue.mark_syncing(queued.id).await.unwrap();
            let failed = queue.mark_failed(queued.id, "timeout").await.unwrap();
            assert_eq!(failed.retry_count, attempt);
            assert_eq!(failed.status, OperationStatus::Pending);
            assert!(failed.completed_at.is_none());
            assert_eq!(failed.error_message.as_deref(), Some("timeout"));
        }

        queue.mark_syncing(queued.id).await.unwrap();
        let failed = queue.mark_failed(queued.id, "server down").await.unwrap();
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.status, OperationStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("server down"));

        // terminal: no longer dequeued, cannot fail again
        assert!(queue.dequeue_next(10).await.unwrap().is_empty());
        assert!(matches!(
            queue.mark_failed(queued.id, "again").await,
            Err(QueueError::Transition(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_failed_respects_custom_max_retries() {
        let (queue, _db) = queue().await;
        let queued = queue
            .enqueue(op("a", Priority::Medium).with_max_retries(1))
            .await
            .unwrap();

        let failed = queue.mark_failed(queued.id, "boom").await.unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.retry_count, 1);
    }

    #[tokio::test]
    async fn test_complete_after_failed_is_rejected() {
        let (queue, _db) = queue().await;
        let queued = queue
            .enqueue(op("a", Priority::Medium).with_max_retries(1))
            .await
            .unwrap();
        queue.mark_failed(queued.id, "boom").await.unwrap();

        assert!(matches!(
            queue.mark_complete(queued.id).await,
            Err(QueueError::Transition(SyncError::InvalidOperationTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reset_for_retry() {
        let (queue, _db) = queue().await;
        let queued = queue
            .enqueue(op("a", Priority::Medium).with_max_retries(1))
            .await
            .unwrap();

        // only valid from failed
        assert!(queue.reset_for_retry(queued.id).await.is_err());

        queue.mark_failed(queued.id, "boom").await.unwrap();
        let reset = queue.reset_for_retry(queued.id).await.unwrap();

        assert_eq!(reset.status, OperationStatus::Pending);
        assert_eq!(reset.retry_count, 0);
        assert!(reset.error_message.is_none());
        assert!(reset.completed_at.is_none());
        assert_eq!(queue.dequeue_next(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let (queue, _db) = queue().await;
        let a = queue.enqueue(op("a", Priority::Medium)).await.unwrap();
        let b = queue.enqueue(op("b", Priority::Medium)).await.unwrap();
        queue.mark_syncing(b.id).await.unwrap();

        assert!(queue.cancel(a.id).await.unwrap());
        assert!(queue.get(a.id).await.unwrap().is_none());

        assert!(!queue.cancel(b.id).await.unwrap());
        assert!(queue.get(b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reclaim_stale_syncing() {
        let (queue, _db) = queue().await;
        let queued = queue.enqueue(op("a", Priority::Medium)).await.unwrap();
        queue.mark_syncing(queued.id).await.unwrap();

        let timeout = Duration::minutes(5);
        assert_eq!(queue.reclaim_stale(timeout).await.unwrap(), 0);

        let later = Utc::now() + Duration::minutes(6);
        assert_eq!(queue.reclaim_stale_at(timeout, later).await.unwrap(), 1);

        let reclaimed = queue.get(queued.id).await.unwrap().unwrap();
        assert_eq!(reclaimed.status, OperationStatus::Pending);
        assert_eq!(reclaimed.retry_count, 0);
    }

    #[tokio::test]
    async fn test_purge_completed() {
        let (queue, _db) = queue().await;
        let a = queue.enqueue(op("a", Priority::Medium)).await.unwrap();
        queue.enqueue(op("b", Priority::Medium)).await.unwrap();
        queue.mark_complete(a.id).await.unwrap();

        assert_eq!(
            queue
                .purge_completed(Utc::now() - Duration::days(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            queue
                .purge_completed(Utc::now() + Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(queue.stats().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_query_helpers() {
        let (queue, _db) = queue().await;
        let base = Utc::now() - Duration::minutes(10);

        let mut first = op("c1", Priority::Low);
        first.created_at = base;
        let first = queue.enqueue(first).await.unwrap();
        queue.enqueue(op("c1", Priority::High)).await.unwrap();
        let mut other = SyncOperation::new("team_member", "c1", OperationKind::Create, json!({}));
        other.created_at = base + Duration::minutes(1);
        queue.enqueue(other).await.unwrap();
        let done = queue.enqueue(op("c2", Priority::Medium)).await.unwrap();
        queue.mark_complete(done.id).await.unwrap();

        let for_client = queue.by_entity("client", "c1").await.unwrap();
        assert_eq!(for_client.len(), 2);
        assert_eq!(for_client[0].id, first.id);

        assert_eq!(queue.by_entity_id("c1").await.unwrap().len(), 3);
        assert_eq!(
            queue
                .by_status(OperationStatus::Complete)
                .await
                .unwrap()
                .len(),
            1
        );

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.count(OperationStatus::Failed), 0);

        let oldest = queue.oldest_pending_at().await.unwrap().unwrap();
        assert_eq!(format_ts(oldest), format_ts(base));
    }

    #[tokio::test]
    async fn test_oldest_pending_empty_queue() {
        let (queue, _db) = queue().await;
        assert!(queue.oldest_pending_at().await.unwrap().is_none());
    }
}
