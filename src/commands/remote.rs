use clap::{Args, Subcommand};
use std::path::PathBuf;

use possync_core::{Classification, MutationContext, SyncableEntity};

use crate::sync::SyncService;

/// Apply snapshots received from the remote side
#[derive(Args)]
pub struct RemoteCommand {
    #[command(subcommand)]
    pub command: RemoteSubcommand,
}

#[derive(Subcommand)]
pub enum RemoteSubcommand {
    /// Apply entity snapshots from a JSON file (one object or an array)
    Apply {
        /// Path to the snapshot file
        file: PathBuf,
    },
}

impl RemoteCommand {
    pub async fn run(
        &self,
        service: &SyncService,
        ctx: &MutationContext,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            RemoteSubcommand::Apply { file } => {
                let contents = std::fs::read_to_string(file)
                    .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;
                let snapshots = parse_snapshots(&contents)
                    .map_err(|e| format!("Invalid snapshot file '{}': {}", file.display(), e))?;

                let mut conflicts = 0;
                for snapshot in snapshots {
                    let key = snapshot.key();
                    let applied = service.receive_remote(snapshot, ctx).await?;
                    match (applied.classification, applied.conflict_id) {
                        (Classification::Conflict, Some(id)) if applied.auto_resolved => {
                            println!("{}: conflict {} resolved by last writer wins", key, id);
                        }
                        (Classification::Conflict, Some(id)) => {
                            conflicts += 1;
                            println!("{}: CONFLICT recorded as {}", key, id);
                        }
                        (classification, _) => println!("{}: {}", key, classification),
                    }
                }

                if conflicts > 0 {
                    println!(
                        "\n{} conflict(s) need a decision. Run 'possync conflict list'.",
                        conflicts
                    );
                }
                Ok(())
            }
        }
    }
}

fn parse_snapshots(contents: &str) -> Result<Vec<SyncableEntity>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(contents)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}
