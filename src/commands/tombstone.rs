use chrono::Utc;
use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;
use crate::sync::SyncService;

/// Inspect and purge soft-deleted entities
#[derive(Args)]
pub struct TombstoneCommand {
    #[command(subcommand)]
    pub command: TombstoneSubcommand,
}

#[derive(Subcommand)]
pub enum TombstoneSubcommand {
    /// List tombstones of a store
    List {
        /// Store (default: store_id from config)
        #[arg(long)]
        store: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove tombstones that have expired and whose delete has synced
    Cleanup {
        /// Store (default: store_id from config)
        #[arg(long)]
        store: Option<String>,
    },
}

impl TombstoneCommand {
    pub async fn run(
        &self,
        service: &SyncService,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            TombstoneSubcommand::List { store, format } => {
                let store = store.as_deref().unwrap_or(&config.store_id.value);
                let tombstones = service.entities().list_tombstones(store).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&tombstones)?);
                    }
                    OutputFormat::Text => {
                        if tombstones.is_empty() {
                            println!("No tombstones in store {}", store);
                            return Ok(());
                        }
                        println!(
                            "{:<40}  {:<9}  {:<10}  {:<9}  DELETED BY",
                            "ENTITY", "STATUS", "EXPIRES", "PURGEABLE"
                        );
                        println!("{}", "-".repeat(92));
                        let now = Utc::now();
                        for entity in &tombstones {
                            let expires = entity
                                .tombstone
                                .tombstone_expires_at
                                .map(|t| t.format("%Y-%m-%d").to_string())
                                .unwrap_or_default();
                            let purgeable = if entity.is_purgeable(now) { "yes" } else { "no" };
                            println!(
                                "{:<40}  {:<9}  {:<10}  {:<9}  {}",
                                entity.key(),
                                entity.sync_status.to_string(),
                                expires,
                                purgeable,
                                entity.tombstone.deleted_by.as_deref().unwrap_or("-")
                            );
                        }
                        println!("\nTotal: {} tombstone(s)", tombstones.len());
                    }
                }
                Ok(())
            }

            TombstoneSubcommand::Cleanup { store } => {
                let store = store.as_deref().unwrap_or(&config.store_id.value);
                let removed = service.cleanup_expired_tombstones(store).await?;
                println!("Removed {} expired tombstone(s) from store {}", removed, store);
                Ok(())
            }
        }
    }
}
