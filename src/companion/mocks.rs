//! Scriptable in-memory transport for agent tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::protocol::*;
use super::{find_by_prefix, Transport, TransportEvent};
use crate::error::{AgentError, Result};

/// Fake node that records calls and emits events like a real link
pub struct FakeTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: AtomicBool,
    connect_failures: Mutex<VecDeque<bool>>,
    pub contacts: Mutex<Vec<Contact>>,
    pub status: RepeaterStatus,
    pub telemetry: Mutex<Vec<u8>>,
    pub inbox: Mutex<VecDeque<InboundMessage>>,
    /// Delivered (with a MessageWaiting event) the first time the inbox is found empty
    pub late_message: Mutex<Option<InboundMessage>>,
    pub sent: Mutex<Vec<(u8, String)>>,
    pub calls: Mutex<Vec<&'static str>>,
    pub fail_clock_sync: AtomicBool,
    pub login_gate: Mutex<Option<Arc<Notify>>>,
    connects: AtomicUsize,
    logins: AtomicUsize,
    active_logins: AtomicUsize,
    max_active_logins: AtomicUsize,
}

pub fn repeater_key() -> PublicKey {
    let mut key = [0x77u8; PUBLIC_KEY_SIZE];
    key[..3].copy_from_slice(&[0xA1, 0xB2, 0xC3]);
    PublicKey(key)
}

pub fn repeater_contact() -> Contact {
    Contact {
        public_key: repeater_key(),
        kind: ContactType::Repeater,
        flags: 0,
        out_path_len: 2,
        name: "Hilltop".to_string(),
        last_advert: 0,
        latitude: 0.0,
        longitude: 0.0,
    }
}

pub fn sample_status() -> RepeaterStatus {
    RepeaterStatus {
        batt_milli_volts: 4120,
        curr_tx_queue_len: 0,
        noise_floor: -112,
        last_rssi: -68,
        n_packets_recv: 1500,
        n_packets_sent: 900,
        total_air_time_secs: 321,
        total_up_time_secs: 86400,
        n_sent_flood: 400,
        n_sent_direct: 500,
        n_recv_flood: 1000,
        n_recv_direct: 500,
        err_events: 1,
        last_snr: 9.25,
        n_direct_dups: 3,
        n_flood_dups: 12,
    }
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let fake = Self {
            events,
            connected: AtomicBool::new(false),
            connect_failures: Mutex::new(VecDeque::new()),
            contacts: Mutex::new(vec![repeater_contact()]),
            status: sample_status(),
            telemetry: Mutex::new(vec![1, 0x67, 0x00, 0x64]),
            inbox: Mutex::new(VecDeque::new()),
            late_message: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_clock_sync: AtomicBool::new(false),
            login_gate: Mutex::new(None),
            connects: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            active_logins: AtomicUsize::new(0),
            max_active_logins: AtomicUsize::new(0),
        };
        (Arc::new(fake), rx)
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures.lock().unwrap().extend(std::iter::repeat(true).take(n));
    }

    /// Let connect attempts succeed again
    pub fn allow_connects(&self) {
        self.connect_failures.lock().unwrap().clear();
    }

    /// Hold every login until the returned gate is notified
    pub fn gate_logins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Simulate link loss
    pub fn drop_link(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn max_active_logins(&self) -> usize {
        self.max_active_logins.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AgentError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let fail = self.connect_failures.lock().unwrap().pop_front().unwrap_or(false);
        if fail {
            return Err(AgentError::TransportUnavailable("port busy".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn device_query(&self) -> Result<DeviceInfo> {
        self.record("device_query");
        self.ensure_connected()?;
        Ok(DeviceInfo {
            firmware_version: 3,
            firmware_build_date: "1 Jan 2025".into(),
            model: "Fake".into(),
        })
    }

    async fn sync_clock(&self) -> Result<()> {
        self.record("sync_clock");
        self.ensure_connected()?;
        if self.fail_clock_sync.load(Ordering::SeqCst) {
            return Err(AgentError::Timeout("clock sync".into()));
        }
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        self.record("list_contacts");
        self.ensure_connected()?;
        Ok(self.contacts.lock().unwrap().clone())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        self.record("list_channels");
        self.ensure_connected()?;
        Ok(vec![
            Channel { index: 0, name: "Public".into() },
            Channel { index: 1, name: "ops".into() },
        ])
    }

    async fn find_contact_by_key_prefix(&self, prefix: &[u8]) -> Result<Option<Contact>> {
        self.ensure_connected()?;
        let contacts = self.contacts.lock().unwrap().clone();
        Ok(find_by_prefix(contacts, prefix))
    }

    async fn login(&self, _public_key: &PublicKey, _password: &str) -> Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let active = self.active_logins.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_logins.fetch_max(active, Ordering::SeqCst);

        let gate = self.login_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.active_logins.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_status(&self, _public_key: &PublicKey) -> Result<RepeaterStatus> {
        Ok(self.status)
    }

    async fn get_telemetry(&self, _public_key: &PublicKey) -> Result<Vec<u8>> {
        Ok(self.telemetry.lock().unwrap().clone())
    }

    async fn send_channel_text(&self, channel_idx: u8, text: &str) -> Result<()> {
        self.ensure_connected()?;
        self.sent.lock().unwrap().push((channel_idx, text.to_string()));
        Ok(())
    }

    async fn next_message(&self) -> Result<Option<InboundMessage>> {
        self.ensure_connected()?;
        let next = self.inbox.lock().unwrap().pop_front();
        if next.is_none() {
            let late = self.late_message.lock().unwrap().take();
            if let Some(message) = late {
                self.inbox.lock().unwrap().push_back(message);
                let _ = self.events.send(TransportEvent::MessageWaiting);
                // The empty reply reaches the caller only after the event
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        Ok(next)
    }
}
