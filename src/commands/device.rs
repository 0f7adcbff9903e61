use clap::{Args, Subcommand};

use crate::config::{Config, ConfigSource};
use crate::device;

/// Show this device's identity
#[derive(Args)]
pub struct DeviceCommand {
    #[command(subcommand)]
    pub command: DeviceSubcommand,
}

#[derive(Subcommand)]
pub enum DeviceSubcommand {
    /// Print the device id stamped on local changes
    Show,
}

impl DeviceCommand {
    pub fn run(&self, config: &Config, device_id: &str) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            DeviceSubcommand::Show => {
                println!("device_id: {}", device_id);
                match config.device_id.source {
                    ConfigSource::Default => println!(
                        "  source: {}",
                        device::device_id_path(&config.data_dir()).display()
                    ),
                    ref source => println!("  source: {}", source),
                }
                println!("user: {}", config.user.value);
                println!("tenant: {}", config.tenant_id.value);
                println!("store: {}", config.store_id.value);
                Ok(())
            }
        }
    }
}
