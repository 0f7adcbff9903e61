use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::{Config, SyncConfig};

const TEMPLATE_HEADER: &str = "\
# possync configuration
#
# Environment variables (POSSYNC_DATABASE_PATH, POSSYNC_DEVICE_ID,
# POSSYNC_USER, POSSYNC_TENANT_ID, POSSYNC_STORE_ID) override these values.
";

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a config file with default values
    Init {
        /// Where to write (default: platform config dir)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init { path, force } => {
                let path = path.clone().unwrap_or_else(Config::default_config_path);
                if path.exists() && !force {
                    return Err(format!(
                        "Config file already exists: {} (use --force to overwrite)",
                        path.display()
                    )
                    .into());
                }
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(&path, default_config_yaml(config)?)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    match &config.device_id.value {
        Some(id) => println!("device_id: {}", id),
        None => println!("device_id: (generated on first use)"),
    }
    println!("  source: {}", config.device_id.source);
    println!();

    println!("user: {}", config.user.value);
    println!("  source: {}", config.user.source);
    println!("tenant_id: {}", config.tenant_id.value);
    println!("  source: {}", config.tenant_id.source);
    println!("store_id: {}", config.store_id.value);
    println!("  source: {}", config.store_id.source);
    println!();

    let sync = &config.sync;
    println!("sync:");
    println!("  max_retries: {}", sync.max_retries);
    println!("  default_priority: {}", sync.default_priority);
    println!("  tombstone_retention_days: {}", sync.tombstone_retention_days);
    println!("  dispatch_timeout_secs: {}", sync.dispatch_timeout_secs);
    println!("  batch_size: {}", sync.batch_size);
    println!("  poll_interval_secs: {}", sync.poll_interval_secs);
    println!("  conflict_policy: {}", sync.conflict_policy);
}

#[derive(serde::Serialize)]
struct ConfigTemplate<'a> {
    user: &'a str,
    tenant_id: &'a str,
    store_id: &'a str,
    sync: SyncConfig,
}

/// Default file contents. Identity values already resolved from the
/// environment are carried over so `init` captures the current setup.
fn default_config_yaml(config: &Config) -> Result<String, serde_yaml::Error> {
    let body = serde_yaml::to_string(&ConfigTemplate {
        user: &config.user.value,
        tenant_id: &config.tenant_id.value,
        store_id: &config.store_id.value,
        sync: SyncConfig::default(),
    })?;
    Ok(format!("{}\n{}", TEMPLATE_HEADER, body))
}
