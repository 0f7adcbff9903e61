use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use possync::core::MutationContext;
use possync::db::init_db;
use possync::{config, device, sync};

use commands::{
    ConfigCommand, ConflictCommand, DeviceCommand, DispatchCommand, EntityCommand, QueueCommand,
    RemoteCommand, TombstoneCommand,
};
use config::Config;
use sync::SyncService;

#[derive(Parser)]
#[command(name = "possync")]
#[command(version)]
#[command(about = "Offline-first sync queue for point-of-sale devices", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and change syncable entities
    Entity(EntityCommand),

    /// Inspect and manage queued sync operations
    Queue(QueueCommand),

    /// Send queued operations
    Dispatch(DispatchCommand),

    /// Apply remote snapshots
    Remote(RemoteCommand),

    /// Review and resolve conflicts
    Conflict(ConflictCommand),

    /// Manage tombstones
    Tombstone(TombstoneCommand),

    /// Show device identity
    Device(DeviceCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "possync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let device_id = match &config.device_id.value {
        Some(id) => id.clone(),
        None => device::load_or_create(&config.data_dir())?,
    };

    if let Commands::Device(cmd) = &command {
        return cmd.run(&config, &device_id);
    }

    let ctx = MutationContext::new(config.user.value.clone(), device_id);
    let pool = init_db(&config.database_path.value).await?;
    let service = SyncService::new(pool, config.sync.clone());
    tracing::debug!("Device {} using {}", ctx.device_id, config.database_path.value.display());

    match command {
        Commands::Entity(cmd) => cmd.run(&service, &ctx, &config).await?,
        Commands::Queue(cmd) => cmd.run(&service).await?,
        Commands::Dispatch(cmd) => cmd.run(&service).await?,
        Commands::Remote(cmd) => cmd.run(&service, &ctx).await?,
        Commands::Conflict(cmd) => cmd.run(&service, &ctx).await?,
        Commands::Tombstone(cmd) => cmd.run(&service, &config).await?,
        Commands::Device(_) | Commands::Config(_) => {}
    }

    Ok(())
}
