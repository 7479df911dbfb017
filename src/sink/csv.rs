//! CSV file sink.
//!
//! The file is created with a header row when absent, otherwise rows are
//! appended. Status cycles write one row each; telemetry cycles write one row
//! per decoded reading.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::{format_timestamp, RecordSink, StatusSnapshot, TelemetryRecord};
use crate::error::Result;

/// Status CSV columns
pub const STATUS_HEADER: [&str; 17] = [
    "timestamp",
    "batt_milli_volts",
    "curr_tx_queue_len",
    "noise_floor",
    "last_rssi",
    "n_packets_recv",
    "n_packets_sent",
    "total_air_time_secs",
    "total_up_time_secs",
    "n_sent_flood",
    "n_sent_direct",
    "n_recv_flood",
    "n_recv_direct",
    "err_events",
    "last_snr",
    "n_direct_dups",
    "n_flood_dups",
];

/// Telemetry CSV columns
pub const TELEMETRY_HEADER: [&str; 6] = [
    "timestamp",
    "channel",
    "type",
    "value_1",
    "value_2",
    "value_3",
];

#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, header: &[&str], rows: &[String]) -> Result<()> {
        // A poisoned lock only means another writer panicked mid-row
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let write_header = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut out = String::new();
        if write_header {
            out.push_str(&header.join(","));
            out.push('\n');
        }
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        file.write_all(out.as_bytes())?;

        debug!("Wrote {} row(s) to {}", rows.len(), self.path.display());
        Ok(())
    }
}

fn status_row(snapshot: &StatusSnapshot) -> String {
    let s = &snapshot.status;
    [
        format_timestamp(&snapshot.captured_at),
        s.batt_milli_volts.to_string(),
        s.curr_tx_queue_len.to_string(),
        s.noise_floor.to_string(),
        s.last_rssi.to_string(),
        s.n_packets_recv.to_string(),
        s.n_packets_sent.to_string(),
        s.total_air_time_secs.to_string(),
        s.total_up_time_secs.to_string(),
        s.n_sent_flood.to_string(),
        s.n_sent_direct.to_string(),
        s.n_recv_flood.to_string(),
        s.n_recv_direct.to_string(),
        s.err_events.to_string(),
        s.last_snr.to_string(),
        s.n_direct_dups.to_string(),
        s.n_flood_dups.to_string(),
    ]
    .join(",")
}

fn telemetry_rows(record: &TelemetryRecord) -> Vec<String> {
    let timestamp = format_timestamp(&record.captured_at);
    record
        .readings
        .iter()
        .map(|reading| {
            let mut values: Vec<String> = reading
                .value
                .components()
                .iter()
                .map(|v| v.to_string())
                .collect();
            values.resize(3, String::new());
            format!(
                "{},{},{},{}",
                timestamp,
                reading.channel,
                reading.type_name(),
                values.join(",")
            )
        })
        .collect()
}

impl RecordSink for CsvSink {
    fn record_status(&self, snapshot: &StatusSnapshot) -> Result<()> {
        self.append(&STATUS_HEADER, &[status_row(snapshot)])
    }

    fn record_telemetry(&self, record: &TelemetryRecord) -> Result<()> {
        if record.readings.is_empty() {
            return Ok(());
        }
        self.append(&TELEMETRY_HEADER, &telemetry_rows(record))
    }
}
