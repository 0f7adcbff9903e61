//! Queue drain loop.
//!
//! One dispatcher per device. Each cycle reclaims operations stuck in
//! syncing, then claims pending operations in priority order and hands them
//! to a [`Transport`]. The claim guard in `mark_syncing` is only sufficient
//! while a single dispatcher runs against the database.

use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use possync_core::{OperationStatus, SyncEvent, SyncOperation};

use super::service::{ServiceError, SyncService};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Delivers one operation to the remote side.
pub trait Transport {
    fn send(&self, op: &SyncOperation) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Counts from a single drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub reclaimed: u64,
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Held back behind an in-flight or failed operation on the same entity.
    pub skipped: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self == &DispatchReport::default()
    }
}

impl std::fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent {}, retrying {}, failed {}, skipped {}, reclaimed {}",
            self.sent, self.retrying, self.failed, self.skipped, self.reclaimed
        )
    }
}

pub struct Dispatcher<T> {
    service: SyncService,
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(service: SyncService, transport: T) -> Self {
        Self { service, transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one drain cycle over at most `batch_size` operations.
    pub async fn drain_once(&self) -> Result<DispatchReport, ServiceError> {
        let queue = self.service.queue();
        let config = self.service.config();
        let mut report = DispatchReport {
            reclaimed: queue.reclaim_stale(config.dispatch_timeout()).await?,
            ..DispatchReport::default()
        };

        // operations on one entity go out in creation order, so an entity
        // with an operation in flight or parked in failed is held back
        let mut blocked: HashSet<(String, String)> = HashSet::new();
        for status in [OperationStatus::Syncing, OperationStatus::Failed] {
            blocked.extend(
                queue
                    .by_status(status)
                    .await?
                    .into_iter()
                    .map(|op| (op.entity_type, op.entity_id)),
            );
        }

        for op in queue.dequeue_next(config.batch_size).await? {
            let key = (op.entity_type.clone(), op.entity_id.clone());
            if blocked.contains(&key) || !queue.mark_syncing(op.id).await? {
                report.skipped += 1;
                continue;
            }
            self.service
                .apply_dispatch_event(&op, SyncEvent::DispatchStarted)
                .await?;

            match self.transport.send(&op).await {
                Ok(()) => {
                    queue.mark_complete(op.id).await?;
                    self.service
                        .apply_dispatch_event(&op, SyncEvent::DispatchSucceeded)
                        .await?;
                    report.sent += 1;
                }
                Err(e) => {
                    let attempt = queue.mark_failed(op.id, &e.to_string()).await?;
                    if attempt.retries_exhausted() {
                        self.service
                            .apply_dispatch_event(&op, SyncEvent::DispatchFailed)
                            .await?;
                        report.failed += 1;
                    } else {
                        self.service
                            .apply_dispatch_event(&op, SyncEvent::DispatchRetrying)
                            .await?;
                        report.retrying += 1;
                    }
                    blocked.insert(key);
                }
            }
        }

        if !report.is_idle() {
            tracing::info!("Dispatch cycle: {}", report);
        }
        Ok(report)
    }

    /// Drain on every poll interval until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.service.config().poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.drain_once().await {
                        tracing::warn!("Dispatch cycle failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Appends each operation as one JSON line to a file, for handing the queue
/// to an external uploader.
#[derive(Debug, Clone)]
pub struct JsonLinesTransport {
    path: PathBuf,
}

impl JsonLinesTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Transport for JsonLinesTransport {
    async fn send(&self, op: &SyncOperation) -> Result<(), TransportError> {
        let mut line =
            serde_json::to_string(op).map_err(|e| TransportError(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| TransportError(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError(format!("{}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| TransportError(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::db::test_support::{setup, TestDb};
    use chrono::{Duration, Utc};
    use possync_core::{MutationContext, Priority, SyncStatus};
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records what it sends; fails for the listed entity ids.
    #[derive(Default)]
    struct MockTransport {
        failing: Mutex<HashSet<String>>,
        sent: Mutex<Vec<SyncOperation>>,
    }

    impl MockTransport {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Self::default()
            }
        }

        fn recover(&self, id: &str) {
            self.failing.lock().unwrap().remove(id);
        }

        fn sent(&self) -> Vec<Uuid> {
            self.sent.lock().unwrap().iter().map(|op| op.id).collect()
        }

        fn sent_versions(&self, entity_id: &str) -> Vec<u64> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|op| op.entity_id == entity_id)
                .filter_map(SyncOperation::payload_version)
                .collect()
        }
    }

    impl Transport for MockTransport {
        async fn send(&self, op: &SyncOperation) -> Result<(), TransportError> {
            if self.failing.lock().unwrap().contains(&op.entity_id) {
                return Err(TransportError("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(op.clone());
            Ok(())
        }
    }

    fn ctx() -> MutationContext {
        MutationContext::new("cashier", "register-1")
    }

    async fn service_with(config: SyncConfig) -> (SyncService, TestDb) {
        let db = setup().await;
        (SyncService::new(db.pool.clone(), config), db)
    }

    async fn create(service: &SyncService, id: &str) {
        service
            .create("client", id, "tenant1", "store1", json!({"name": id}), &ctx())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_sends_in_priority_order() {
        let (service, _db) = service_with(SyncConfig::default()).await;
        create(&service, "c1").await;
        create(&service, "c2").await;
        service
            .with_priority(Priority::High)
            .create("client", "c3", "tenant1", "store1", json!({}), &ctx())
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::default());
        let report = dispatcher.drain_once().await.unwrap();

        assert_eq!(report.sent, 3);
        let first = service
            .queue()
            .get(dispatcher.transport().sent()[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.entity_id, "c3");

        let stats = service.queue().stats().await.unwrap();
        assert_eq!(stats.complete, 3);
        for id in ["c1", "c2", "c3"] {
            let entity = service.entities().get("client", id).await.unwrap().unwrap();
            assert_eq!(entity.sync_status, SyncStatus::Synced);
            assert_eq!(entity.last_synced_version, Some(1));
        }

        assert!(dispatcher.drain_once().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_drain_respects_batch_size() {
        let config = SyncConfig {
            batch_size: 2,
            ..SyncConfig::default()
        };
        let (service, _db) = service_with(config).await;
        for id in ["c1", "c2", "c3"] {
            create(&service, id).await;
        }

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::default());
        assert_eq!(dispatcher.drain_once().await.unwrap().sent, 2);
        assert_eq!(dispatcher.drain_once().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn test_failures_retry_then_fail() {
        let config = SyncConfig {
            max_retries: 2,
            ..SyncConfig::default()
        };
        let (service, _db) = service_with(config).await;
        create(&service, "bad").await;
        create(&service, "good").await;

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::failing(&["bad"]));

        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!((report.sent, report.retrying, report.failed), (1, 1, 0));
        let entity = service.entities().get("client", "bad").await.unwrap().unwrap();
        assert_eq!(entity.sync_status, SyncStatus::Pending);

        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!((report.sent, report.retrying, report.failed), (0, 0, 1));
        let entity = service.entities().get("client", "bad").await.unwrap().unwrap();
        assert_eq!(entity.sync_status, SyncStatus::Error);

        let failed = service
            .queue()
            .by_status(OperationStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 2);
        assert_eq!(failed[0].error_message.as_deref(), Some("connection refused"));

        // terminal until reset
        assert!(dispatcher.drain_once().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_failure_holds_back_later_operations_on_same_entity() {
        let (service, _db) = service_with(SyncConfig::default()).await;
        create(&service, "bad").await;
        service
            .update("client", "bad", json!({"name": "v2"}), &ctx())
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::failing(&["bad"]));
        let report = dispatcher.drain_once().await.unwrap();

        assert_eq!(report.retrying, 1);
        assert_eq!(report.skipped, 1);
        let ops = service.queue().by_entity("client", "bad").await.unwrap();
        assert_eq!(ops[0].retry_count, 1);
        assert_eq!(ops[1].retry_count, 0);
    }

    #[tokio::test]
    async fn test_failed_operation_holds_back_entity_until_retried() {
        let config = SyncConfig {
            max_retries: 1,
            ..SyncConfig::default()
        };
        let (service, _db) = service_with(config).await;
        create(&service, "c1").await;

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::failing(&["c1"]));
        assert_eq!(dispatcher.drain_once().await.unwrap().failed, 1);
        let failed = service
            .queue()
            .by_status(OperationStatus::Failed)
            .await
            .unwrap()
            .remove(0);

        service
            .update("client", "c1", json!({"name": "v2"}), &ctx())
            .await
            .unwrap();
        dispatcher.transport().recover("c1");

        // the update must wait behind the failed create
        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 1);

        service.retry_failed(failed.id).await.unwrap();
        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!(report.sent, 2);

        assert_eq!(dispatcher.transport().sent_versions("c1"), vec![1, 2]);
        let entity = service.entities().get("client", "c1").await.unwrap().unwrap();
        assert_eq!(entity.sync_status, SyncStatus::Synced);
        assert_eq!(entity.last_synced_version, Some(2));
    }

    #[tokio::test]
    async fn test_in_flight_entity_is_skipped() {
        let (service, _db) = service_with(SyncConfig::default()).await;
        create(&service, "c1").await;
        service
            .update("client", "c1", json!({"name": "v2"}), &ctx())
            .await
            .unwrap();

        let first = service.queue().dequeue_next(1).await.unwrap().remove(0);
        service.queue().mark_syncing(first.id).await.unwrap();

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::default());
        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_stale_syncing_is_reclaimed() {
        let (service, db) = service_with(SyncConfig::default()).await;
        create(&service, "c1").await;
        let op = service.queue().dequeue_next(1).await.unwrap().remove(0);
        service.queue().mark_syncing(op.id).await.unwrap();

        // claimed by a dispatcher that died an hour ago
        let stale = (Utc::now() - Duration::hours(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        sqlx::query("UPDATE sync_queue SET updated_at = ? WHERE id = ?")
            .bind(stale)
            .bind(op.id.to_string())
            .execute(&db.pool)
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::default());
        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.sent, 1);

        let done = service.queue().get(op.id).await.unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Complete);
        assert_eq!(done.retry_count, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (service, _db) = service_with(SyncConfig::default()).await;
        create(&service, "c1").await;

        let dispatcher = Dispatcher::new(service.clone(), MockTransport::default());
        let (tx, rx) = watch::channel(false);

        let stop = async {
            // first tick fires immediately
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(dispatcher.run(rx), stop);

        assert_eq!(dispatcher.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_transport_appends() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        let (service, _db) = service_with(SyncConfig::default()).await;
        create(&service, "c1").await;
        create(&service, "c2").await;

        let dispatcher = Dispatcher::new(service, JsonLinesTransport::new(&path));
        assert_eq!(dispatcher.drain_once().await.unwrap().sent, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["entityId"], "c1");
        assert_eq!(lines[0]["operationKind"], "create");
        assert_eq!(lines[0]["payload"]["version"], 1);
    }
}
