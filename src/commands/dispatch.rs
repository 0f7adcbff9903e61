use clap::Args;
use std::path::PathBuf;
use tokio::sync::watch;

use crate::sync::{Dispatcher, JsonLinesTransport, SyncService};

/// Drain the sync queue
///
/// Pending operations are sent in priority order and appended as JSON lines
/// to the export file, where an uploader can pick them up.
#[derive(Args)]
pub struct DispatchCommand {
    /// File that receives one JSON line per sent operation
    #[arg(long, short)]
    export: PathBuf,

    /// Keep draining on the configured poll interval until interrupted
    #[arg(long, short)]
    watch: bool,
}

impl DispatchCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        let dispatcher = Dispatcher::new(service.clone(), JsonLinesTransport::new(&self.export));

        if !self.watch {
            let report = dispatcher.drain_once().await?;
            if report.is_idle() {
                println!("Nothing to dispatch");
            } else {
                println!("Dispatched: {}", report);
            }
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });

        tracing::info!(
            "Dispatching to {} every {}s (Ctrl-C to stop)",
            self.export.display(),
            service.config().poll_interval_secs
        );
        dispatcher.run(shutdown_rx).await;
        Ok(())
    }
}
