//! # Poll Scheduler
//!
//! Drives the recurring login + fetch cycle against the configured repeater.
//!
//! The scheduler is armed every time the session becomes ready and disarmed
//! on link loss. Arming fires one cycle immediately and installs the interval
//! timer; the first timer tick lands one full interval later so the two
//! triggers never coincide. At most one cycle runs at a time: a trigger that
//! arrives while a cycle is still outstanding is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::timer::TimerSlot;
use crate::companion::Transport;
use crate::config::{PollMode, RepeaterConfig};
use crate::error::{AgentError, Result};
use crate::lpp::decoder::decode_report;
use crate::sink::{RecordSink, StatusSnapshot, TelemetryRecord};

/// Repeater selected for polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub prefix: Vec<u8>,
    pub password: String,
    pub mode: PollMode,
}

impl PollTarget {
    pub fn from_config(config: &RepeaterConfig) -> Result<Self> {
        Ok(Self {
            prefix: config.prefix_bytes()?,
            password: config.password.clone(),
            mode: config.mode,
        })
    }
}

/// One fetch attempt
#[derive(Debug, Clone)]
pub struct PollCycle {
    pub target_prefix: Vec<u8>,
    pub credential: String,
    pub started_at: DateTime<Utc>,
}

impl PollCycle {
    pub fn begin(target: &PollTarget) -> Self {
        Self {
            target_prefix: target.prefix.clone(),
            credential: target.password.clone(),
            started_at: Utc::now(),
        }
    }
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// Fired by [`PollScheduler::arm`]
    Immediate,
    /// Fired by the interval timer
    Interval,
}

/// Result of a successful cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CycleOutcome {
    Status(StatusSnapshot),
    Telemetry(TelemetryRecord),
}

pub struct PollScheduler {
    transport: Arc<dyn Transport>,
    target: Arc<PollTarget>,
    interval: Duration,
    timer: TimerSlot,
    in_flight: Option<JoinHandle<()>>,
    sink: Option<Arc<dyn RecordSink>>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("target", &self.target)
            .field("interval", &self.interval)
            .field("timer", &self.timer)
            .field("cycle_running", &self.is_cycle_running())
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        target: PollTarget,
        interval: Duration,
        sink: Option<Arc<dyn RecordSink>>,
    ) -> Self {
        Self {
            transport,
            target: Arc::new(target),
            interval,
            timer: TimerSlot::new("poll"),
            in_flight: None,
            sink,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn is_cycle_running(&self) -> bool {
        self.in_flight
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Install the interval timer (replacing any previous one) and fire one cycle now
    pub fn arm(&mut self) {
        self.timer.arm(self.interval);
        info!(
            "Polling repeater every {} minute(s)",
            self.interval.as_secs() / 60
        );
        self.fire(CycleTrigger::Immediate);
    }

    /// Stop scheduling cycles; a cycle already running is left to finish
    pub fn disarm(&mut self) {
        if self.timer.cancel() {
            info!("Polling paused");
        }
    }

    /// Start a cycle unless one is outstanding; returns whether one was started
    pub fn fire(&mut self, trigger: CycleTrigger) -> bool {
        if !self.timer.is_armed() {
            debug!("Ignoring {:?} trigger while disarmed", trigger);
            return false;
        }

        if self.is_cycle_running() {
            warn!("Previous poll cycle still running, skipping {:?} trigger", trigger);
            return false;
        }

        let transport = self.transport.clone();
        let target = self.target.clone();
        let sink = self.sink.clone();

        self.in_flight = Some(tokio::spawn(async move {
            let cycle = PollCycle::begin(&target);
            debug!("Starting poll cycle ({:?})", trigger);
            if let Err(e) = run_cycle(transport.as_ref(), &cycle, target.mode, sink.as_ref()).await {
                error!("Poll cycle failed: {}", e);
            }
        }));
        true
    }

    /// Wait for the next interval tick and fire a cycle
    ///
    /// Pending forever while disarmed.
    pub async fn tick(&mut self) {
        self.timer.tick().await;
        self.fire(CycleTrigger::Interval);
    }

    /// Wait for the outstanding cycle, if any
    pub async fn settle(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if let Err(e) = handle.await {
                error!("Poll cycle task aborted: {}", e);
            }
        }
    }
}

/// Run one cycle: resolve the repeater, log in, fetch, and record the result
///
/// Sink failures are logged and do not fail the cycle.
pub async fn run_cycle(
    transport: &dyn Transport,
    cycle: &PollCycle,
    mode: PollMode,
    sink: Option<&Arc<dyn RecordSink>>,
) -> Result<CycleOutcome> {
    let contact = transport
        .find_contact_by_key_prefix(&cycle.target_prefix)
        .await?
        .ok_or_else(|| AgentError::TargetNotFound(hex::encode(&cycle.target_prefix)))?;

    info!("Found repeater: {}", contact.name);
    info!("Login to repeater...");
    transport.login(&contact.public_key, &cycle.credential).await?;

    let outcome = match mode {
        PollMode::Status => {
            info!("Fetch status...");
            let status = transport.get_status(&contact.public_key).await?;
            let snapshot = StatusSnapshot {
                captured_at: cycle.started_at,
                status,
            };
            log_json("Status", &snapshot.status);
            if let Some(sink) = sink {
                let snapshot = snapshot.clone();
                record_with(sink, "status", move |sink| sink.record_status(&snapshot)).await;
            }
            CycleOutcome::Status(snapshot)
        }
        PollMode::Telemetry => {
            info!("Fetch telemetry...");
            let buffer = transport.get_telemetry(&contact.public_key).await?;
            let report = decode_report(&buffer);
            if let Some(halt) = &report.halted {
                warn!(
                    "Telemetry decode stopped early after {} reading(s): {}",
                    report.readings.len(),
                    halt
                );
            }
            let record = TelemetryRecord {
                captured_at: cycle.started_at,
                readings: report.readings,
            };
            log_json("Telemetry", &record.readings);
            if let Some(sink) = sink {
                let record = record.clone();
                record_with(sink, "telemetry", move |sink| sink.record_telemetry(&record)).await;
            }
            CycleOutcome::Telemetry(record)
        }
    };

    Ok(outcome)
}

/// Hand one write to the blocking pool so slow storage never stalls the runtime
///
/// Failures are logged and do not fail the cycle.
async fn record_with<F>(sink: &Arc<dyn RecordSink>, what: &str, write: F)
where
    F: FnOnce(&dyn RecordSink) -> Result<()> + Send + 'static,
{
    let sink = sink.clone();
    match tokio::task::spawn_blocking(move || write(sink.as_ref())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to record {}: {}", what, e),
        Err(e) => error!("Recording {} did not complete: {}", what, e),
    }
}

fn log_json<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => info!("{}: {}", label, json),
        Err(e) => warn!("Failed to serialise {}: {}", label.to_lowercase(), e),
    }
}
