//! Channel command responder.
//!
//! Answers the ping and date commands on private channels. Channel 0 is the
//! shared public channel and is never answered.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::companion::protocol::ChannelMessage;
use crate::config::CommandConfig;

/// Index of the shared public channel
pub const PUBLIC_CHANNEL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponder {
    ping: String,
    date: String,
}

impl CommandResponder {
    pub fn new(ping: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            ping: ping.into(),
            date: date.into(),
        }
    }

    /// `None` when commands are disabled
    pub fn from_config(config: &CommandConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.ping.clone(), config.date.clone()))
    }

    /// Reply text for `message`, if it carries a command
    ///
    /// The ping token wins when a message contains both.
    pub fn reply_for(&self, message: &ChannelMessage, now: DateTime<Utc>) -> Option<String> {
        if message.channel_idx == PUBLIC_CHANNEL {
            return None;
        }

        if message.text.contains(&self.ping) {
            Some(format!("PONG! 🏓 ({})", message.path_len))
        } else if message.text.contains(&self.date) {
            Some(now.to_rfc3339_opts(SecondsFormat::Millis, true))
        } else {
            None
        }
    }
}
