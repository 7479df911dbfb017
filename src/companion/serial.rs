//! # Serial Companion Transport
//!
//! [`Transport`] implementation over a USB serial link to a MeshCore companion
//! node.
//!
//! This module handles:
//! - Opening the serial port (8N1, no flow control)
//! - A reader task that splits the byte stream into frames, turns adverts and
//!   message-waiting pushes into [`TransportEvent`]s and forwards everything
//!   else to the request in progress
//! - Disconnect detection (EOF or read error) with exactly one
//!   `Disconnected` event per link
//! - One request/response exchange at a time, each bounded by the request
//!   timeout

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::codec::{encode_frame, FrameDecoder};
use super::protocol::*;
use super::{find_by_prefix, Transport, TransportEvent};
use crate::error::{AgentError, Result};

/// Application name announced on connect
const APP_NAME: &str = "meshcore-agent";

/// Serial read chunk size
const READ_CHUNK_SIZE: usize = 256;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open link to the node
struct Link {
    writer: BoxedWriter,
    replies: mpsc::UnboundedReceiver<Vec<u8>>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// MeshCore companion node over USB serial
pub struct SerialTransport {
    port_path: String,
    baud_rate: u32,
    request_timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Mutex<Option<Link>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_path", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Create a transport for `port_path`; nothing is opened until [`Transport::connect`]
    ///
    /// Returns the transport and the receiver for its events.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use meshcore_agent::companion::{SerialTransport, Transport};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let (transport, mut events) =
    ///         SerialTransport::new("/dev/ttyUSB0", 115_200, Duration::from_secs(30));
    ///     transport.connect().await?;
    ///     println!("{:?}", events.recv().await);
    ///     Ok(())
    /// }
    /// ```
    pub fn new(
        port_path: impl Into<String>,
        baud_rate: u32,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            port_path: port_path.into(),
            baud_rate,
            request_timeout,
            events,
            link: Mutex::new(None),
        };
        (transport, rx)
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    /// Open a specific serial port with companion link settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| AgentError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Install a new link over any byte stream and start its reader task
    async fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            reader,
            reply_tx,
            self.events.clone(),
            alive.clone(),
        ));

        *self.link.lock().await = Some(Link {
            writer: Box::new(writer),
            replies,
            alive,
            reader,
        });
        let _ = self.events.send(TransportEvent::Connected);
    }

    /// Send one request and wait until `accept` resolves a reply
    ///
    /// `accept` sees every non-event frame as `(code, body)`; returning `None`
    /// keeps waiting. The whole wait is bounded by the request timeout.
    async fn exchange<T, F>(&self, request: Vec<u8>, what: &str, mut accept: F) -> Result<T>
    where
        F: FnMut(u8, &[u8]) -> Option<Result<T>> + Send,
        T: Send,
    {
        let mut guard = self.link.lock().await;
        let link = match guard.as_mut() {
            Some(link) if link.alive.load(Ordering::SeqCst) => link,
            _ => return Err(AgentError::NotConnected),
        };

        // Late replies to an earlier timed-out request must not answer this one
        while let Ok(stale) = link.replies.try_recv() {
            debug!("Discarding stale frame 0x{:02X}", stale.first().copied().unwrap_or(0));
        }

        let frame = encode_frame(&request);
        link.writer
            .write_all(&frame)
            .await
            .map_err(|e| AgentError::Serial(format!("Failed to write request: {}", e)))?;
        link.writer
            .flush()
            .await
            .map_err(|e| AgentError::Serial(format!("Failed to flush serial port: {}", e)))?;
        debug!("Sent {} request ({} bytes)", what, frame.len());

        let replies = &mut link.replies;
        let wait = async {
            loop {
                let reply = replies.recv().await.ok_or(AgentError::NotConnected)?;
                let Some((&code, body)) = reply.split_first() else {
                    continue;
                };
                if let Some(result) = accept(code, body) {
                    return result;
                }
                debug!("Ignoring frame 0x{:02X} while waiting for {}", code, what);
            }
        };

        tokio::time::timeout(self.request_timeout, wait)
            .await
            .map_err(|_| AgentError::Timeout(what.to_string()))?
    }

    async fn app_start(&self) -> Result<()> {
        self.exchange(app_start_request(APP_NAME), "self info", |code, _| match code {
            RESP_SELF_INFO => Some(Ok(())),
            RESP_ERR => Some(Err(AgentError::Protocol("node rejected app start".into()))),
            _ => None,
        })
        .await
    }

    async fn channel(&self, index: u8) -> Result<Option<Channel>> {
        self.exchange(get_channel_request(index), "channel info", |code, body| match code {
            RESP_CHANNEL_INFO => Some(parse_channel_info(body).map(Some)),
            RESP_ERR => Some(Ok(None)),
            _ => None,
        })
        .await
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self) -> Result<()> {
        {
            let guard = self.link.lock().await;
            if matches!(guard.as_ref(), Some(link) if link.alive.load(Ordering::SeqCst)) {
                return Ok(());
            }
        }

        debug!("Trying to open serial port: {}", self.port_path);
        let port = Self::open_port(&self.port_path, self.baud_rate)
            .map_err(|e| AgentError::TransportUnavailable(e.to_string()))?;
        info!("Opened companion node at {}", self.port_path);

        self.attach(port).await;

        if let Err(e) = self.app_start().await {
            warn!("App start handshake failed: {}", e);
        }
        Ok(())
    }

    async fn device_query(&self) -> Result<DeviceInfo> {
        self.exchange(device_query_request(), "device info", |code, body| match code {
            RESP_DEVICE_INFO => Some(parse_device_info(body)),
            RESP_ERR => Some(Err(AgentError::Protocol("device query rejected".into()))),
            _ => None,
        })
        .await
    }

    async fn sync_clock(&self) -> Result<()> {
        let now = device_time(Utc::now())?;
        self.exchange(set_device_time_request(now), "clock sync", |code, _| match code {
            RESP_OK => Some(Ok(())),
            RESP_ERR => Some(Err(AgentError::Protocol("node rejected device time".into()))),
            _ => None,
        })
        .await
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut contacts = Vec::new();
        self.exchange(get_contacts_request(), "contacts", |code, body| match code {
            RESP_CONTACTS_START => None,
            RESP_CONTACT => match parse_contact(body) {
                Ok(contact) => {
                    contacts.push(contact);
                    None
                }
                Err(e) => Some(Err(e)),
            },
            RESP_END_OF_CONTACTS => Some(Ok(std::mem::take(&mut contacts))),
            RESP_ERR => Some(Err(AgentError::Protocol("contact listing rejected".into()))),
            _ => None,
        })
        .await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        for index in 0..=u8::MAX {
            match self.channel(index).await? {
                Some(channel) => channels.push(channel),
                None => break,
            }
        }
        Ok(channels)
    }

    async fn find_contact_by_key_prefix(&self, prefix: &[u8]) -> Result<Option<Contact>> {
        let contacts = self.list_contacts().await?;
        Ok(find_by_prefix(contacts, prefix))
    }

    async fn login(&self, public_key: &PublicKey, password: &str) -> Result<()> {
        let expected = &public_key.as_bytes()[..PUB_KEY_PREFIX_SIZE];
        self.exchange(send_login_request(public_key, password), "login", |code, body| match code {
            RESP_SENT => None,
            PUSH_LOGIN_SUCCESS => match parse_login_response(body) {
                Ok(prefix) if prefix.as_slice() == expected => Some(Ok(())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            },
            PUSH_LOGIN_FAIL => Some(Err(AgentError::AuthenticationFailed(format!(
                "repeater {} rejected the password",
                hex::encode(expected)
            )))),
            RESP_ERR => Some(Err(AgentError::AuthenticationFailed(
                "node refused to send login".into(),
            ))),
            _ => None,
        })
        .await
    }

    async fn get_status(&self, public_key: &PublicKey) -> Result<RepeaterStatus> {
        let expected = &public_key.as_bytes()[..PUB_KEY_PREFIX_SIZE];
        self.exchange(send_status_request(public_key), "status", |code, body| match code {
            RESP_SENT => None,
            PUSH_STATUS_RESPONSE => match parse_status_response(body) {
                Ok((prefix, status)) if prefix.as_slice() == expected => Some(Ok(status)),
                Ok(_) => None,
                Err(e) => Some(Err(AgentError::FetchFailed(e.to_string()))),
            },
            RESP_ERR => Some(Err(AgentError::FetchFailed("node refused status request".into()))),
            _ => None,
        })
        .await
    }

    async fn get_telemetry(&self, public_key: &PublicKey) -> Result<Vec<u8>> {
        let expected = &public_key.as_bytes()[..PUB_KEY_PREFIX_SIZE];
        self.exchange(send_telemetry_request(public_key), "telemetry", |code, body| match code {
            RESP_SENT => None,
            PUSH_TELEMETRY_RESPONSE => match parse_telemetry_response(body) {
                Ok((prefix, lpp)) if prefix.as_slice() == expected => Some(Ok(lpp)),
                Ok(_) => None,
                Err(e) => Some(Err(AgentError::FetchFailed(e.to_string()))),
            },
            RESP_ERR => Some(Err(AgentError::FetchFailed(
                "node refused telemetry request".into(),
            ))),
            _ => None,
        })
        .await
    }

    async fn send_channel_text(&self, channel_idx: u8, text: &str) -> Result<()> {
        let now = device_time(Utc::now())?;
        let request = send_channel_text_request(channel_idx, now, text);
        self.exchange(request, "channel send", |code, _| match code {
            RESP_SENT | RESP_OK => Some(Ok(())),
            RESP_ERR => Some(Err(AgentError::Protocol(format!(
                "node refused text on channel {}",
                channel_idx
            )))),
            _ => None,
        })
        .await
    }

    async fn next_message(&self) -> Result<Option<InboundMessage>> {
        self.exchange(sync_next_message_request(), "next message", |code, body| match code {
            RESP_CONTACT_MSG_RECV => Some(
                parse_contact_message(body).map(|m| Some(InboundMessage::Contact(m))),
            ),
            RESP_CHANNEL_MSG_RECV => Some(
                parse_channel_message(body).map(|m| Some(InboundMessage::Channel(m))),
            ),
            RESP_NO_MORE_MESSAGES => Some(Ok(None)),
            _ => None,
        })
        .await
    }
}

/// Node clocks are unsigned 32-bit epoch seconds
fn device_time(now: DateTime<Utc>) -> Result<u32> {
    u32::try_from(now.timestamp()).map_err(|_| {
        AgentError::Protocol(format!("{} does not fit the node's 32-bit clock", now))
    })
}

/// Split the inbound stream into frames until the link drops
async fn read_loop<R>(
    mut reader: R,
    replies: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    alive: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                info!("Serial link closed");
                break;
            }
            Ok(n) => {
                decoder.push(&chunk[..n]);
                while let Some(frame) = decoder.next_frame() {
                    route_frame(frame, &replies, &events);
                }
            }
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Disconnected);
}

/// Dispatch one inbound frame to the event stream or the waiting request
fn route_frame(
    frame: Vec<u8>,
    replies: &mpsc::UnboundedSender<Vec<u8>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let Some((&code, body)) = frame.split_first() else {
        return;
    };

    match code {
        PUSH_ADVERT | PUSH_NEW_ADVERT => match parse_advert(body) {
            Ok(key) => {
                let _ = events.send(TransportEvent::Advert(key));
            }
            Err(e) => debug!("Malformed advert push: {}", e),
        },
        PUSH_MSG_WAITING => {
            let _ = events.send(TransportEvent::MessageWaiting);
        }
        PUSH_PATH_UPDATED | PUSH_SEND_CONFIRMED => {
            debug!("Ignoring push 0x{:02X}", code);
        }
        _ => {
            let _ = replies.send(frame);
        }
    }
}
