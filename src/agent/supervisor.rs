//! # Connection Supervisor
//!
//! Owns the session state of the link to the local node and the reconnect
//! timer.
//!
//! The session is a small state machine driven by transport events:
//!
//! ```text
//!                 Connect                ConnectSucceeded
//! Disconnected ------------> Connecting -----------------> Connected
//!      ^                         |                             |
//!      +------ ConnectFailed ----+                             |
//!      +----------------------- Disconnected ------------------+
//! ```
//!
//! Losing the link (or failing to connect) arms a single recurring reconnect
//! timer. The timer is only ever cancelled by a successful connection; a
//! failed attempt leaves it armed so the next tick retries.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::timer::TimerSlot;
use crate::companion::Transport;
use crate::config::SetupConfig;
use crate::error::{AgentError, Result};

/// Link state as seen by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Inputs of the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connect attempt is starting
    Connect,
    /// The transport reported an established link
    ConnectSucceeded,
    /// A connect attempt returned an error
    ConnectFailed,
    /// The transport reported link loss
    Disconnected,
}

/// What happened during post-connect setup
#[derive(Debug, Default)]
pub struct SetupReport {
    /// Steps that failed, as `SetupStepFailed` errors
    pub failures: Vec<AgentError>,
}

impl SetupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn step<T>(&mut self, step: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let failure = AgentError::SetupStepFailed {
                    step,
                    reason: e.to_string(),
                };
                warn!("{}", failure);
                self.failures.push(failure);
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: SessionState,
    reconnect: TimerSlot,
    reconnect_interval: Duration,
    setup: SetupConfig,
}

impl ConnectionSupervisor {
    pub fn new(reconnect_interval: Duration, setup: SetupConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            reconnect: TimerSlot::new("reconnect"),
            reconnect_interval,
            setup,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_reconnect_armed(&self) -> bool {
        self.reconnect.is_armed()
    }

    /// Apply one event and return the new state
    pub fn handle(&mut self, event: SessionEvent) -> SessionState {
        let next = match (self.state, event) {
            (SessionState::Connected, SessionEvent::Connect) => SessionState::Connected,
            (_, SessionEvent::Connect) => SessionState::Connecting,
            (_, SessionEvent::ConnectSucceeded) => {
                self.reconnect.cancel();
                SessionState::Connected
            }
            (SessionState::Connected, SessionEvent::ConnectFailed) => SessionState::Connected,
            (_, SessionEvent::ConnectFailed) => {
                if !self.reconnect.is_armed() {
                    self.reconnect.arm(self.reconnect_interval);
                }
                SessionState::Disconnected
            }
            (_, SessionEvent::Disconnected) => {
                self.reconnect.arm(self.reconnect_interval);
                SessionState::Disconnected
            }
        };

        if next != self.state {
            debug!("Session {:?} -> {:?} on {:?}", self.state, next, event);
        }
        self.state = next;
        next
    }

    /// Initial connection attempt
    ///
    /// A failure is reported and turned into a disconnected session so the
    /// reconnect timer takes over.
    pub async fn start(&mut self, transport: &dyn Transport) -> Result<()> {
        self.handle(SessionEvent::Connect);
        match transport.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to connect initially: {}", e);
                self.handle(SessionEvent::ConnectFailed);
                Err(e)
            }
        }
    }

    /// One reconnect timer tick
    pub async fn retry(&mut self, transport: &dyn Transport) {
        if self.state == SessionState::Connected {
            self.reconnect.cancel();
            return;
        }

        self.handle(SessionEvent::Connect);
        if let Err(e) = transport.connect().await {
            debug!("Reconnect attempt failed: {}", e);
            self.handle(SessionEvent::ConnectFailed);
        }
    }

    /// Wait for the reconnect timer; pending forever while it is not armed
    pub async fn reconnect_tick(&mut self) {
        self.reconnect.tick().await
    }

    /// Handle an established link and run the post-connect setup steps
    ///
    /// Each step is independent: a failing step is logged and the next one
    /// still runs. The caller arms polling afterwards regardless of failures.
    pub async fn on_connected(&mut self, transport: &dyn Transport) -> SetupReport {
        self.handle(SessionEvent::ConnectSucceeded);
        info!("Connected");

        let mut report = SetupReport::default();

        if self.setup.device_query {
            if let Some(device) = report.step("device_query", transport.device_query().await) {
                info!("Model: {}", device.model);
                info!("Firmware build date: {}", device.firmware_build_date);
            }
        }

        if self.setup.sync_clock {
            info!("Sync Clock...");
            report.step("sync_clock", transport.sync_clock().await);
        }

        if self.setup.list_contacts {
            info!("Get Contacts...");
            if let Some(contacts) = report.step("list_contacts", transport.list_contacts().await) {
                for contact in contacts {
                    info!(
                        "{}: {}; Public Key: {}",
                        contact.kind.label(),
                        contact.name,
                        contact.public_key
                    );
                }
            }
        }

        if self.setup.list_channels {
            info!("Get Channels...");
            if let Some(channels) = report.step("list_channels", transport.list_channels().await) {
                for channel in channels.iter().filter(|c| !c.name.is_empty()) {
                    info!("{}: {}", channel.index, channel.name);
                }
            }
        }

        report
    }

    /// Handle link loss
    pub fn on_disconnected(&mut self) {
        self.handle(SessionEvent::Disconnected);
        warn!("Disconnected, trying to reconnect...");
    }
}
