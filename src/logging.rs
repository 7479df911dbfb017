//! # Logging
//!
//! tracing subscriber setup. Every line starts with the UTC time in brackets,
//! e.g. `[2025-06-01T08:00:00Z]`. `RUST_LOG` takes precedence over the
//! configured level. When a log file is configured, lines are also appended
//! to it through a non-blocking writer.

use std::fmt;
use std::fs::OpenOptions;

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{AgentError, Result};

/// `[YYYY-MM-DDTHH:MM:SSZ]` timestamps
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketedUtc;

impl FormatTime for BracketedUtc {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "[{}]", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"))
    }
}

/// Build the level filter from `RUST_LOG`, falling back to `level`
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| AgentError::InvalidArgument(format!("log level '{}': {}", level, e)))
}

/// Install the global subscriber
///
/// The returned guard flushes the log file on drop and must be kept alive
/// for the lifetime of the process.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.level)?;

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(BracketedUtc)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(BracketedUtc))
        .with(file_layer)
        .try_init()
        .map_err(|e| AgentError::InvalidArgument(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}
