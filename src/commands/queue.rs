use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use uuid::Uuid;

use possync_core::OperationStatus;

use super::{truncate, OutputFormat};
use crate::sync::SyncService;

/// Inspect and manage the sync queue
#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List queued operations in dispatch order
    List {
        /// Only operations with this status (pending, syncing, complete, failed)
        #[arg(long, short)]
        status: Option<OperationStatus>,

        /// Only operations for this entity id
        #[arg(long)]
        entity: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one operation
    Show {
        /// Operation ID (UUID)
        id: Uuid,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show operation counts by status
    Stats {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Put a failed operation back in the queue
    Reset {
        /// Operation ID (UUID)
        id: Uuid,
    },

    /// Remove an operation that has not been dispatched yet
    Cancel {
        /// Operation ID (UUID)
        id: Uuid,
    },

    /// Return operations stuck in syncing to pending
    Reclaim {
        /// Seconds in syncing before an operation counts as stuck
        /// (default: sync.dispatch_timeout_secs)
        #[arg(long)]
        timeout_secs: Option<i64>,
    },

    /// Delete completed operations
    Purge {
        /// Only operations completed more than this many days ago
        #[arg(long, default_value = "7")]
        older_than_days: i64,
    },
}

impl QueueCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        let queue = service.queue();

        match &self.command {
            QueueSubcommand::List {
                status,
                entity,
                format,
            } => {
                let mut ops = match (status, entity) {
                    (_, Some(entity_id)) => queue.by_entity_id(entity_id).await?,
                    (Some(status), None) => queue.by_status(*status).await?,
                    (None, None) => {
                        let mut all = Vec::new();
                        for status in OperationStatus::ALL {
                            all.extend(queue.by_status(status).await?);
                        }
                        all
                    }
                };
                if let (Some(status), Some(_)) = (status, entity) {
                    ops.retain(|op| op.status == *status);
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&ops)?);
                    }
                    OutputFormat::Text => {
                        if ops.is_empty() {
                            println!("No operations found");
                            return Ok(());
                        }
                        println!(
                            "{:<36}  {:<6}  {:<8}  {:<8}  {:<7}  ENTITY",
                            "ID", "KIND", "PRIORITY", "STATUS", "RETRIES"
                        );
                        println!("{}", "-".repeat(100));
                        for op in &ops {
                            let entity = format!("{}/{}", op.entity_type, op.entity_id);
                            let retries = format!("{}/{}", op.retry_count, op.max_retries);
                            println!(
                                "{:<36}  {:<6}  {:<8}  {:<8}  {:<7}  {}",
                                op.id,
                                op.kind.to_string(),
                                op.priority.as_i64(),
                                op.status.to_string(),
                                retries,
                                truncate(&entity, 30)
                            );
                        }
                        println!("\nTotal: {} operation(s)", ops.len());
                    }
                }
                Ok(())
            }

            QueueSubcommand::Show { id, format } => {
                let op = queue
                    .get(*id)
                    .await?
                    .ok_or_else(|| format!("Operation not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&op)?);
                    }
                    OutputFormat::Text => {
                        println!("Operation {}", op.id);
                        println!("{}", "=".repeat(46));
                        println!("Entity:    {}/{}", op.entity_type, op.entity_id);
                        println!("Kind:      {}", op.kind);
                        println!("Priority:  {}", op.priority);
                        println!("Status:    {}", op.status);
                        println!("Retries:   {}/{}", op.retry_count, op.max_retries);
                        if let Some(err) = &op.error_message {
                            println!("Error:     {}", err);
                        }
                        println!("Created:   {}", op.created_at.format("%Y-%m-%d %H:%M:%S"));
                        println!("Updated:   {}", op.updated_at.format("%Y-%m-%d %H:%M:%S"));
                        if let Some(done) = op.completed_at {
                            println!("Finished:  {}", done.format("%Y-%m-%d %H:%M:%S"));
                        }
                        println!("Payload:   {}", op.payload);
                    }
                }
                Ok(())
            }

            QueueSubcommand::Stats { format } => {
                let stats = queue.stats().await?;
                let oldest = queue.oldest_pending_at().await?;

                match format {
                    OutputFormat::Json => {
                        let value = serde_json::json!({
                            "counts": stats,
                            "total": stats.total(),
                            "oldestPendingAt": oldest,
                        });
                        println!("{}", serde_json::to_string_pretty(&value)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", stats);
                        println!("total:    {}", stats.total());
                        if let Some(oldest) = oldest {
                            let age = Utc::now() - oldest;
                            println!(
                                "\nOldest pending operation queued {} ({} min ago)",
                                oldest.format("%Y-%m-%d %H:%M:%S"),
                                age.num_minutes()
                            );
                        }
                    }
                }
                Ok(())
            }

            QueueSubcommand::Reset { id } => {
                let op = service.retry_failed(*id).await?;
                println!("Reset for retry: {}", op);
                Ok(())
            }

            QueueSubcommand::Cancel { id } => {
                if queue.cancel(*id).await? {
                    println!("Cancelled operation {}", id);
                    Ok(())
                } else {
                    Err(format!(
                        "Operation {} is no longer pending and cannot be cancelled",
                        id
                    )
                    .into())
                }
            }

            QueueSubcommand::Reclaim { timeout_secs } => {
                let timeout = match timeout_secs {
                    Some(secs) => Duration::seconds(*secs),
                    None => service.config().dispatch_timeout(),
                };
                let reclaimed = queue.reclaim_stale(timeout).await?;
                println!("Reclaimed {} operation(s)", reclaimed);
                Ok(())
            }

            QueueSubcommand::Purge { older_than_days } => {
                let cutoff = Utc::now() - Duration::days(*older_than_days);
                let purged = queue.purge_completed(cutoff).await?;
                println!("Purged {} completed operation(s)", purged);
                Ok(())
            }
        }
    }
}
