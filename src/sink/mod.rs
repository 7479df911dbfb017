//! # Record Sink Module
//!
//! Destination for the records produced by successful poll cycles.
//!
//! This module handles:
//! - The [`RecordSink`] seam the poll scheduler writes through
//! - Status snapshots and telemetry records as handed to sinks
//! - CSV output (append-only, header written when the file is created)

pub mod csv;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::companion::protocol::RepeaterStatus;
use crate::error::Result;
use crate::lpp::protocol::SensorReading;

pub use self::csv::CsvSink;

/// Repeater status captured by one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// When the cycle started
    pub captured_at: DateTime<Utc>,
    pub status: RepeaterStatus,
}

/// Decoded telemetry captured by one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// When the cycle started
    pub captured_at: DateTime<Utc>,
    pub readings: Vec<SensorReading>,
}

/// Output for poll cycle results
pub trait RecordSink: Send + Sync {
    fn record_status(&self, snapshot: &StatusSnapshot) -> Result<()>;

    fn record_telemetry(&self, record: &TelemetryRecord) -> Result<()>;
}

/// ISO-8601 UTC with second precision, e.g. `2025-03-01T12:00:00Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp_drops_subseconds() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(789);
        assert_eq!(format_timestamp(&ts), "2025-03-01T12:30:05Z");
    }
}
