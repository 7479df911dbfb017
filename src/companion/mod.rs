//! # Companion Transport Module
//!
//! Link to the local MeshCore companion node.
//!
//! This module handles:
//! - The [`Transport`] capability the agent drives (connect, clock sync,
//!   enumeration, repeater login and retrieval, channel text)
//! - Connection-state and push notifications delivered as [`TransportEvent`]s
//! - Frame encoding/decoding and the companion wire protocol
//! - The tokio-serial implementation used in the field

pub mod protocol;
pub mod codec;
pub mod serial;

#[cfg(test)]
pub mod mocks;

use async_trait::async_trait;

use crate::error::Result;
use protocol::{Channel, Contact, DeviceInfo, InboundMessage, PublicKey, RepeaterStatus};

pub use serial::SerialTransport;

/// Notifications emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link was established; emitted once per successful connect
    Connected,

    /// The link was lost; emitted once per established link
    Disconnected,

    /// The node has messages waiting in its inbox
    MessageWaiting,

    /// A node advertised itself
    Advert(PublicKey),
}

/// Request/response capability of the local node
///
/// Implementations serialise requests internally, so callers may share one
/// transport between the supervisor, the poll cycle and the responder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link; a no-op when already connected
    async fn connect(&self) -> Result<()>;

    async fn device_query(&self) -> Result<DeviceInfo>;

    /// Set the node's clock to the host's current UTC time
    async fn sync_clock(&self) -> Result<()>;

    async fn list_contacts(&self) -> Result<Vec<Contact>>;

    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// First contact whose public key starts with `prefix`
    async fn find_contact_by_key_prefix(&self, prefix: &[u8]) -> Result<Option<Contact>>;

    async fn login(&self, public_key: &PublicKey, password: &str) -> Result<()>;

    async fn get_status(&self, public_key: &PublicKey) -> Result<RepeaterStatus>;

    /// Raw Cayenne LPP buffer returned by the repeater
    async fn get_telemetry(&self, public_key: &PublicKey) -> Result<Vec<u8>>;

    async fn send_channel_text(&self, channel_idx: u8, text: &str) -> Result<()>;

    /// Pop the next waiting message, `None` once the inbox is empty
    async fn next_message(&self) -> Result<Option<InboundMessage>>;
}

/// Prefix match over a contact list
pub fn find_by_prefix(contacts: Vec<Contact>, prefix: &[u8]) -> Option<Contact> {
    contacts
        .into_iter()
        .find(|contact| contact.public_key.starts_with(prefix))
}
