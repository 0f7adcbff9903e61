use clap::{Args, Subcommand};
use std::io::{self, Write};

use possync_core::{MutationContext, Priority, SyncStatus};

use super::{parse_data, truncate, OutputFormat};
use crate::config::Config;
use crate::sync::SyncService;

/// Create and change syncable entities
#[derive(Args)]
pub struct EntityCommand {
    #[command(subcommand)]
    pub command: EntitySubcommand,
}

#[derive(Subcommand)]
pub enum EntitySubcommand {
    /// Create an entity and queue it for sync
    Create {
        /// Entity type (e.g. client, team_member, appointment)
        entity_type: String,

        /// Entity ID
        id: String,

        /// Entity fields as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,

        /// Tenant (default: tenant_id from config)
        #[arg(long)]
        tenant: Option<String>,

        /// Store (default: store_id from config)
        #[arg(long)]
        store: Option<String>,

        /// Dispatch priority: 1/high, 2/medium, 3/low
        #[arg(long, short)]
        priority: Option<Priority>,
    },

    /// Replace an entity's data and queue the change
    Update {
        entity_type: String,
        id: String,

        /// New entity fields as a JSON object
        #[arg(long)]
        data: String,

        /// Dispatch priority: 1/high, 2/medium, 3/low
        #[arg(long, short)]
        priority: Option<Priority>,
    },

    /// Soft-delete an entity (kept as a tombstone until it expires)
    Delete {
        entity_type: String,
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,

        /// Dispatch priority: 1/high, 2/medium, 3/low
        #[arg(long, short)]
        priority: Option<Priority>,
    },

    /// Undo a soft delete
    Restore { entity_type: String, id: String },

    /// Show an entity with its sync fields
    Show {
        entity_type: String,
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List entities
    List {
        /// Only entities of this type
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<String>,

        /// Only entities with this sync status
        #[arg(long, short)]
        status: Option<SyncStatus>,

        /// Include soft-deleted entities
        #[arg(long)]
        deleted: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl EntityCommand {
    pub async fn run(
        &self,
        service: &SyncService,
        ctx: &MutationContext,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            EntitySubcommand::Create {
                entity_type,
                id,
                data,
                tenant,
                store,
                priority,
            } => {
                if entity_type.trim().is_empty() || id.trim().is_empty() {
                    return Err("Entity type and id cannot be empty".into());
                }
                let data = parse_data(data)?;
                let tenant = tenant.as_deref().unwrap_or(&config.tenant_id.value);
                let store = store.as_deref().unwrap_or(&config.store_id.value);

                let created = with_priority(service, *priority)
                    .create(entity_type.trim(), id.trim(), tenant, store, data, ctx)
                    .await?;
                println!("Created entity:");
                println!("{}", created);
                Ok(())
            }

            EntitySubcommand::Update {
                entity_type,
                id,
                data,
                priority,
            } => {
                let data = parse_data(data)?;
                let updated = with_priority(service, *priority)
                    .update(entity_type, id, data, ctx)
                    .await?;
                println!("Updated entity:");
                println!("{}", updated);
                Ok(())
            }

            EntitySubcommand::Delete {
                entity_type,
                id,
                force,
                priority,
            } => {
                // Confirm deletion unless --force is used
                if !force {
                    print!("Delete {}/{}? [y/N] ", entity_type, id);
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                let deleted = with_priority(service, *priority)
                    .soft_delete(entity_type, id, ctx)
                    .await?;
                match deleted.tombstone.tombstone_expires_at {
                    Some(expires_at) => println!(
                        "Deleted {} (tombstone kept until {})",
                        deleted.key(),
                        expires_at.format("%Y-%m-%d")
                    ),
                    None => println!("Deleted {}", deleted.key()),
                }
                Ok(())
            }

            EntitySubcommand::Restore { entity_type, id } => {
                let restored = service.restore(entity_type, id, ctx).await?;
                println!("Restored entity:");
                println!("{}", restored);
                Ok(())
            }

            EntitySubcommand::Show {
                entity_type,
                id,
                format,
            } => {
                let entity = service
                    .entities()
                    .get(entity_type, id)
                    .await?
                    .ok_or_else(|| format!("Entity not found: {}/{}", entity_type, id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entity)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", entity);
                        let ops = service.queue().by_entity(entity_type, id).await?;
                        if !ops.is_empty() {
                            println!("\nOperations:");
                            for op in &ops {
                                println!("  {}", op);
                            }
                        }
                        let conflicts =
                            service.conflicts().list_for_entity(entity_type, id).await?;
                        if !conflicts.is_empty() {
                            println!("\nConflicts:");
                            for conflict in &conflicts {
                                println!(
                                    "  {}  {}  {}",
                                    conflict.id,
                                    conflict.detected_at.format("%Y-%m-%d %H:%M:%S"),
                                    conflict.resolution.as_deref().unwrap_or("open")
                                );
                            }
                        }
                    }
                }
                Ok(())
            }

            EntitySubcommand::List {
                entity_type,
                status,
                deleted,
                format,
            } => {
                let mut entities = service
                    .entities()
                    .list(entity_type.as_deref(), *deleted)
                    .await?;
                if let Some(status) = status {
                    entities.retain(|e| e.sync_status == *status);
                }

                if entities.is_empty() {
                    println!("No entities found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entities)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<40}  {:>7}  {:<9}  {:<7}  CLOCK",
                            "ENTITY", "VERSION", "STATUS", "DELETED"
                        );
                        println!("{}", "-".repeat(90));
                        for entity in &entities {
                            println!(
                                "{:<40}  {:>7}  {:<9}  {:<7}  {}",
                                truncate(&entity.key(), 40),
                                entity.version,
                                entity.sync_status.to_string(),
                                if entity.is_deleted() { "yes" } else { "" },
                                entity.vector_clock
                            );
                        }
                        println!("\nTotal: {} entit(ies)", entities.len());
                    }
                }
                Ok(())
            }
        }
    }
}

fn with_priority(service: &SyncService, priority: Option<Priority>) -> SyncService {
    match priority {
        Some(priority) => service.with_priority(priority),
        None => service.clone(),
    }
}
