//! Command line interface.
//!
//! Every flag is optional and overrides the matching configuration value.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, PollMode};

#[derive(Debug, Parser)]
#[command(name = "meshcore-agent")]
#[command(about = "Field agent for a serial-connected MeshCore companion node")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serial port of the companion node (e.g. /dev/ttyUSB0)
    #[arg(short = 's', long)]
    pub port: Option<String>,

    /// Hex public key prefix of the repeater to poll
    #[arg(short = 'r', long)]
    pub repeater_public_key_prefix: Option<String>,

    /// Poll interval in minutes
    #[arg(short = 'i', long)]
    pub repeater_interval: Option<u64>,

    /// Repeater admin or guest password
    #[arg(short = 'p', long)]
    pub repeater_password: Option<String>,

    /// Append poll results to this CSV file
    #[arg(short = 'c', long)]
    pub csv: Option<PathBuf>,

    /// What to fetch from the repeater: status or telemetry
    #[arg(short = 'm', long)]
    pub mode: Option<PollMode>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Apply command line overrides on top of `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(prefix) = &self.repeater_public_key_prefix {
            config.repeater.public_key_prefix = prefix.clone();
        }
        if let Some(minutes) = self.repeater_interval {
            config.repeater.interval_minutes = minutes;
        }
        if let Some(password) = &self.repeater_password {
            config.repeater.password = password.clone();
        }
        if let Some(csv) = &self.csv {
            config.output.csv_path = Some(csv.clone());
        }
        if let Some(mode) = self.mode {
            config.repeater.mode = mode;
        }
        match self.verbose {
            0 => {}
            1 => config.logging.level = "debug".to_string(),
            _ => config.logging.level = "trace".to_string(),
        }
    }
}
