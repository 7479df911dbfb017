//! # Agent Module
//!
//! Event loop tying the transport, the connection supervisor, the poll
//! scheduler and the command responder together.
//!
//! Transport events arrive over an mpsc channel and are handled one at a
//! time. Timer ticks (reconnect and poll) are multiplexed into the same loop
//! with `tokio::select!`, so session state is only ever touched from here.

pub mod timer;
pub mod supervisor;
pub mod scheduler;
pub mod responder;

use std::future::{self, Future};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::companion::protocol::InboundMessage;
use crate::companion::{Transport, TransportEvent};
use crate::config::Config;
use crate::error::Result;
use crate::sink::{format_timestamp, RecordSink};

pub use responder::CommandResponder;
pub use scheduler::{PollScheduler, PollTarget};
pub use supervisor::{ConnectionSupervisor, SessionState};

pub struct Agent {
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    supervisor: ConnectionSupervisor,
    scheduler: Option<PollScheduler>,
    responder: Option<Arc<CommandResponder>>,
    drain: Option<JoinHandle<()>>,
    /// A message-waiting event arrived while a drain was running
    drain_queued: bool,
}

impl Agent {
    /// Build an agent from configuration
    ///
    /// Polling is only set up when a repeater prefix is configured.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: &Config,
        sink: Option<Arc<dyn RecordSink>>,
    ) -> Result<Self> {
        let supervisor =
            ConnectionSupervisor::new(config.serial.reconnect_interval(), config.setup.clone());

        let scheduler = if config.repeater.is_enabled() {
            let target = PollTarget::from_config(&config.repeater)?;
            info!(
                "Repeater {} will be polled for {:?}",
                config.repeater.public_key_prefix, target.mode
            );
            Some(PollScheduler::new(
                transport.clone(),
                target,
                config.repeater.interval(),
                sink,
            ))
        } else {
            info!("No repeater configured, polling disabled");
            None
        };

        let responder = CommandResponder::from_config(&config.commands).map(Arc::new);

        Ok(Self {
            transport,
            events,
            supervisor,
            scheduler,
            responder,
            drain: None,
            drain_queued: false,
        })
    }

    pub fn session_state(&self) -> SessionState {
        self.supervisor.state()
    }

    /// Run until `shutdown` completes or the transport goes away
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        // Failure is already logged and leaves the reconnect timer armed
        let _ = self.supervisor.start(self.transport.as_ref()).await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down...");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        warn!("Transport event channel closed");
                        break;
                    }
                },

                _ = self.supervisor.reconnect_tick() => {
                    self.supervisor.retry(self.transport.as_ref()).await;
                }

                _ = poll_tick(&mut self.scheduler) => {}

                _ = drain_finished(&mut self.drain) => {
                    self.drain = None;
                    if std::mem::take(&mut self.drain_queued) {
                        debug!("Messages announced during drain, draining again");
                        self.start_drain();
                    }
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let report = self.supervisor.on_connected(self.transport.as_ref()).await;
                if !report.is_clean() {
                    warn!("{} setup step(s) failed", report.failures.len());
                }
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.arm();
                }
            }
            TransportEvent::Disconnected => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.disarm();
                }
                self.supervisor.on_disconnected();
            }
            TransportEvent::MessageWaiting => self.start_drain(),
            TransportEvent::Advert(public_key) => {
                info!("Advert: {}", public_key);
            }
        }
    }

    fn start_drain(&mut self) {
        // The running drain may already have seen an empty inbox, so go again once it ends
        if self.drain.is_some() {
            debug!("Inbox drain already running, queueing another pass");
            self.drain_queued = true;
            return;
        }

        let transport = self.transport.clone();
        let responder = self.responder.clone();
        self.drain = Some(tokio::spawn(drain_inbox(transport, responder)));
    }

    /// Stop polling and let outstanding work finish
    async fn stop(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.disarm();
            scheduler.settle().await;
        }
        if let Some(drain) = self.drain.take() {
            let _ = drain.await;
        }
    }
}

/// Wait for the running drain task; pending forever when there is none
async fn drain_finished(drain: &mut Option<JoinHandle<()>>) {
    match drain {
        Some(handle) => {
            if let Err(e) = handle.await {
                warn!("Inbox drain task aborted: {}", e);
            }
        }
        None => future::pending().await,
    }
}

async fn poll_tick(scheduler: &mut Option<PollScheduler>) {
    match scheduler {
        Some(scheduler) => scheduler.tick().await,
        None => future::pending().await,
    }
}

/// Pull messages until the node reports an empty inbox
async fn drain_inbox(transport: Arc<dyn Transport>, responder: Option<Arc<CommandResponder>>) {
    loop {
        let message = match transport.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to fetch waiting message: {}", e);
                break;
            }
        };

        match message {
            InboundMessage::Contact(message) => {
                info!(
                    "Contact message from {} at {}: {}",
                    hex::encode(message.pub_key_prefix),
                    sender_time(message.sender_timestamp),
                    message.text
                );
            }
            InboundMessage::Channel(message) => {
                info!(
                    "Channel {} message at {}: {}",
                    message.channel_idx,
                    sender_time(message.sender_timestamp),
                    message.text
                );

                let reply = responder
                    .as_ref()
                    .and_then(|responder| responder.reply_for(&message, Utc::now()));
                if let Some(reply) = reply {
                    info!("Replying on channel {}: {}", message.channel_idx, reply);
                    if let Err(e) = transport.send_channel_text(message.channel_idx, &reply).await {
                        warn!("Failed to send reply: {}", e);
                    }
                }
            }
        }
    }
}

fn sender_time(epoch_secs: u32) -> String {
    DateTime::<Utc>::from_timestamp(i64::from(epoch_secs), 0)
        .map(|ts| format_timestamp(&ts))
        .unwrap_or_else(|| epoch_secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::mocks::FakeTransport;
    use crate::companion::protocol::{ChannelMessage, ContactMessage};
    use crate::sink::mocks::MemorySink;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::sleep;

    fn polling_config() -> Config {
        let mut config = Config::default();
        config.repeater.public_key_prefix = "a1b2c3".to_string();
        config
    }

    fn agent(
        fake: &Arc<FakeTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: &Config,
        sink: Option<Arc<MemorySink>>,
    ) -> Agent {
        let sink = sink.map(|s| s as Arc<dyn RecordSink>);
        Agent::new(fake.clone(), events, config, sink).unwrap()
    }

    #[test]
    fn test_invalid_prefix_is_rejected() {
        let (fake, events) = FakeTransport::new();
        let mut config = Config::default();
        config.repeater.public_key_prefix = "xyz".to_string();
        assert!(Agent::new(fake, events, &config, None).is_err());
    }

    #[test]
    fn test_sender_time_formatting() {
        assert_eq!(sender_time(1_700_000_000), "2023-11-14T22:13:20Z");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_connect_is_retried_then_polls() {
        let (fake, events) = FakeTransport::new();
        fake.fail_next_connects(2);
        let sink = Arc::new(MemorySink::default());
        let mut agent = agent(&fake, events, &polling_config(), Some(sink.clone()));

        agent.run(sleep(Duration::from_secs(10))).await.unwrap();

        // Initial attempt, failed retry at 3s, successful retry at 6s
        assert_eq!(fake.connects(), 3);
        assert_eq!(agent.session_state(), SessionState::Connected);
        assert_eq!(
            fake.calls(),
            vec!["device_query", "sync_clock", "list_contacts", "list_channels"]
        );
        assert_eq!(fake.logins(), 1);
        assert_eq!(sink.statuses.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_still_arms_polling() {
        let (fake, events) = FakeTransport::new();
        fake.fail_clock_sync.store(true, Ordering::SeqCst);
        let mut agent = agent(&fake, events, &polling_config(), None);

        agent.run(sleep(Duration::from_secs(1))).await.unwrap();

        assert_eq!(fake.calls().len(), 4);
        assert_eq!(fake.logins(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_pauses_polling_until_reconnect() {
        let (fake, events) = FakeTransport::new();
        let mut agent = agent(&fake, events, &polling_config(), None);

        let script = {
            let fake = fake.clone();
            async move {
                sleep(Duration::from_secs(1)).await;
                assert_eq!(fake.logins(), 1);

                // Offline across a whole poll interval
                fake.fail_next_connects(1000);
                fake.drop_link();
                sleep(Duration::from_secs(20 * 60)).await;
                assert_eq!(fake.logins(), 1);

                fake.allow_connects();
                sleep(Duration::from_secs(4)).await;
                assert_eq!(fake.logins(), 2);

                // Next cycle is one interval after the reconnect, not earlier
                sleep(Duration::from_secs(14 * 60)).await;
                assert_eq!(fake.logins(), 2);
                sleep(Duration::from_secs(60)).await;
                assert_eq!(fake.logins(), 3);
            }
        };

        agent.run(script).await.unwrap();
        assert_eq!(agent.session_state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_messages_are_drained_and_answered() {
        let (fake, events) = FakeTransport::new();
        {
            let mut inbox = fake.inbox.lock().unwrap();
            inbox.push_back(InboundMessage::Contact(ContactMessage {
                pub_key_prefix: [1, 2, 3, 4, 5, 6],
                path_len: 0,
                txt_type: 0,
                sender_timestamp: 1_700_000_000,
                text: ".ping".into(),
            }));
            inbox.push_back(InboundMessage::Channel(ChannelMessage {
                channel_idx: 0,
                path_len: 1,
                txt_type: 0,
                sender_timestamp: 1_700_000_000,
                text: "someone: .ping".into(),
            }));
            inbox.push_back(InboundMessage::Channel(ChannelMessage {
                channel_idx: 2,
                path_len: 4,
                txt_type: 0,
                sender_timestamp: 1_700_000_000,
                text: "alice: .ping".into(),
            }));
        }
        let mut agent = agent(&fake, events, &Config::default(), None);

        let script = {
            let fake = fake.clone();
            async move {
                sleep(Duration::from_secs(1)).await;
                fake.emit(TransportEvent::MessageWaiting);
                sleep(Duration::from_secs(1)).await;
            }
        };
        agent.run(script).await.unwrap();

        assert!(fake.inbox.lock().unwrap().is_empty());
        assert_eq!(
            *fake.sent.lock().unwrap(),
            vec![(2, "PONG! 🏓 (4)".to_string())]
        );
        assert_eq!(fake.logins(), 0, "polling is off without a repeater");
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_announced_during_drain_is_fetched() {
        let (fake, events) = FakeTransport::new();
        *fake.late_message.lock().unwrap() = Some(InboundMessage::Channel(ChannelMessage {
            channel_idx: 2,
            path_len: 3,
            txt_type: 0,
            sender_timestamp: 1_700_000_000,
            text: "bob: .ping".into(),
        }));
        let mut agent = agent(&fake, events, &Config::default(), None);

        let script = {
            let fake = fake.clone();
            async move {
                sleep(Duration::from_secs(1)).await;
                fake.emit(TransportEvent::MessageWaiting);
                sleep(Duration::from_secs(60)).await;
            }
        };
        agent.run(script).await.unwrap();

        assert!(fake.late_message.lock().unwrap().is_none());
        assert!(
            fake.inbox.lock().unwrap().is_empty(),
            "message announced while draining was left on the node"
        );
        assert_eq!(
            *fake.sent.lock().unwrap(),
            vec![(2, "PONG! 🏓 (3)".to_string())]
        );
    }
}
