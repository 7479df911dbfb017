//! # MeshCore Agent
//!
//! Field agent for a serial-connected MeshCore companion node.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse the command line and load the configuration file (if any)
//!    - Set up logging
//!    - Create the serial transport and the optional CSV sink
//!
//! 2. **Main Loop**
//!    - Connect, retrying every few seconds until the node answers
//!    - Sync the clock and enumerate contacts and channels on every connect
//!    - Poll the repeater immediately and then on every interval
//!    - Answer channel commands
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C stops polling and waits for an outstanding cycle
//!
//! # Examples
//!
//! ```bash
//! meshcore-agent -s /dev/ttyUSB0 -r a1b2c3 -i 15 -p secret -c status.csv
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use meshcore_agent::agent::Agent;
use meshcore_agent::cli::Cli;
use meshcore_agent::companion::SerialTransport;
use meshcore_agent::config::Config;
use meshcore_agent::logging;
use meshcore_agent::sink::{CsvSink, RecordSink};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging::init(&config.logging)?;

    info!("MeshCore Agent v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Serial port: {}", config.serial.port);

    let (transport, events) = SerialTransport::new(
        config.serial.port.clone(),
        config.serial.baud_rate,
        config.serial.request_timeout(),
    );

    let sink: Option<Arc<dyn RecordSink>> = config.output.csv_path.as_ref().map(|path| {
        info!("Writing poll results to {}", path.display());
        Arc::new(CsvSink::new(path)) as Arc<dyn RecordSink>
    });

    if !config.repeater.is_enabled() && sink.is_some() {
        warn!("CSV output configured but no repeater to poll");
    }

    let mut agent = Agent::new(Arc::new(transport), events, &config, sink)?;

    info!("Press Ctrl+C to exit");
    agent
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
