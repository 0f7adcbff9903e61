use clap::{Args, Subcommand, ValueEnum};
use uuid::Uuid;

use possync_core::{MutationContext, Resolution};

use super::{parse_data, OutputFormat};
use crate::sync::SyncService;

#[derive(Clone, Copy, ValueEnum)]
pub enum Keep {
    /// Keep this device's version
    Local,
    /// Take the remote version
    Remote,
    /// Replace both with the data given by --data
    Merged,
}

/// Review and resolve sync conflicts
#[derive(Args)]
pub struct ConflictCommand {
    #[command(subcommand)]
    pub command: ConflictSubcommand,
}

#[derive(Subcommand)]
pub enum ConflictSubcommand {
    /// List conflicts
    List {
        /// Include resolved conflicts
        #[arg(long, short)]
        all: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show both sides of a conflict
    Show {
        /// Conflict ID (UUID)
        id: Uuid,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Resolve a conflict and queue the result
    Resolve {
        /// Conflict ID (UUID)
        id: Uuid,

        /// Which side to keep
        #[arg(long, value_enum)]
        keep: Keep,

        /// Merged entity fields as a JSON object (with --keep merged)
        #[arg(long)]
        data: Option<String>,
    },
}

impl ConflictCommand {
    pub async fn run(
        &self,
        service: &SyncService,
        ctx: &MutationContext,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConflictSubcommand::List { all, format } => {
                let conflicts = service.list_conflicts(!all).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&conflicts)?);
                    }
                    OutputFormat::Text => {
                        if conflicts.is_empty() {
                            println!("No conflicts found");
                            return Ok(());
                        }
                        println!(
                            "{:<36}  {:<30}  {:<19}  RESOLUTION",
                            "ID", "ENTITY", "DETECTED"
                        );
                        println!("{}", "-".repeat(100));
                        for conflict in &conflicts {
                            println!(
                                "{:<36}  {:<30}  {:<19}  {}",
                                conflict.id,
                                format!("{}/{}", conflict.entity_type, conflict.entity_id),
                                conflict.detected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                                conflict.resolution.as_deref().unwrap_or("open")
                            );
                        }
                        println!("\nTotal: {} conflict(s)", conflicts.len());
                    }
                }
                Ok(())
            }

            ConflictSubcommand::Show { id, format } => {
                let conflict = service
                    .conflicts()
                    .get(*id)
                    .await?
                    .ok_or_else(|| format!("Conflict not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&conflict)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", conflict);
                        println!("\nLocal data:  {}", conflict.local.data);
                        println!("Remote data: {}", conflict.remote.data);
                    }
                }
                Ok(())
            }

            ConflictSubcommand::Resolve { id, keep, data } => {
                let resolution = match (keep, data) {
                    (Keep::Merged, Some(data)) => Resolution::Merged(parse_data(data)?),
                    (Keep::Merged, None) => {
                        return Err("--keep merged requires --data".into());
                    }
                    (_, Some(_)) => {
                        return Err("--data is only used with --keep merged".into());
                    }
                    (Keep::Local, None) => Resolution::KeepLocal,
                    (Keep::Remote, None) => Resolution::TakeRemote,
                };

                let resolved = service.resolve_conflict(*id, resolution, ctx).await?;
                println!("Resolved conflict {}:", id);
                println!("{}", resolved);
                Ok(())
            }
        }
    }
}
