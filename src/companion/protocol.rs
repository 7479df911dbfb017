//! # Companion Protocol Constants and Types
//!
//! Command, response and push codes of the MeshCore companion serial protocol,
//! the request payload builders and the parsers for the replies the agent uses.
//! Multi-byte integers on this protocol are little-endian.

use std::fmt;

use serde::Serialize;

use crate::error::{AgentError, Result};

/// Host to device frame marker (`<`)
pub const FRAME_MARKER_OUTBOUND: u8 = 0x3C;

/// Device to host frame marker (`>`)
pub const FRAME_MARKER_INBOUND: u8 = 0x3E;

/// Upper bound on a frame payload; larger lengths are treated as line noise
pub const MAX_FRAME_SIZE: usize = 512;

/// Length of a full public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Length of the public key prefix carried by push notifications
pub const PUB_KEY_PREFIX_SIZE: usize = 6;

/// Companion protocol version announced in device queries
pub const SUPPORTED_PROTOCOL_VERSION: u8 = 1;

// Command codes
pub const CMD_APP_START: u8 = 1;
pub const CMD_SEND_CHANNEL_TXT_MSG: u8 = 3;
pub const CMD_GET_CONTACTS: u8 = 4;
pub const CMD_SET_DEVICE_TIME: u8 = 6;
pub const CMD_SYNC_NEXT_MESSAGE: u8 = 10;
pub const CMD_DEVICE_QUERY: u8 = 22;
pub const CMD_SEND_LOGIN: u8 = 26;
pub const CMD_SEND_STATUS_REQ: u8 = 27;
pub const CMD_GET_CHANNEL: u8 = 31;
pub const CMD_SEND_TELEMETRY_REQ: u8 = 39;

// Response codes
pub const RESP_OK: u8 = 0;
pub const RESP_ERR: u8 = 1;
pub const RESP_CONTACTS_START: u8 = 2;
pub const RESP_CONTACT: u8 = 3;
pub const RESP_END_OF_CONTACTS: u8 = 4;
pub const RESP_SELF_INFO: u8 = 5;
pub const RESP_SENT: u8 = 6;
pub const RESP_CONTACT_MSG_RECV: u8 = 7;
pub const RESP_CHANNEL_MSG_RECV: u8 = 8;
pub const RESP_NO_MORE_MESSAGES: u8 = 10;
pub const RESP_DEVICE_INFO: u8 = 13;
pub const RESP_CHANNEL_INFO: u8 = 18;

// Push codes (unsolicited, always >= 0x80)
pub const PUSH_ADVERT: u8 = 0x80;
pub const PUSH_PATH_UPDATED: u8 = 0x81;
pub const PUSH_SEND_CONFIRMED: u8 = 0x82;
pub const PUSH_MSG_WAITING: u8 = 0x83;
pub const PUSH_LOGIN_SUCCESS: u8 = 0x85;
pub const PUSH_LOGIN_FAIL: u8 = 0x86;
pub const PUSH_STATUS_RESPONSE: u8 = 0x87;
pub const PUSH_NEW_ADVERT: u8 = 0x8A;
pub const PUSH_TELEMETRY_RESPONSE: u8 = 0x8B;

/// Whether a frame code is an unsolicited push
pub fn is_push(code: u8) -> bool {
    code >= 0x80
}

/// 32-byte node public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            AgentError::Protocol(format!("public key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Contact type as advertised by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactType {
    None,
    Chat,
    Repeater,
    Room,
    Unknown(u8),
}

impl From<u8> for ContactType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Chat,
            2 => Self::Repeater,
            3 => Self::Room,
            other => Self::Unknown(other),
        }
    }
}

impl ContactType {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Chat => "Contact",
            Self::Repeater => "Repeater",
            Self::Room => "Room",
            Self::Unknown(_) => "Unknown",
        }
    }
}

/// Entry of the node's contact table
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub public_key: PublicKey,
    pub kind: ContactType,
    pub flags: u8,
    pub out_path_len: i8,
    pub name: String,
    pub last_advert: u32,
    pub latitude: f64,
    pub longitude: f64,
}

/// Configured group channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub index: u8,
    pub name: String,
}

/// Result of a device query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_version: i8,
    pub firmware_build_date: String,
    pub model: String,
}

/// Text received on a group channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel_idx: u8,
    pub path_len: u8,
    pub txt_type: u8,
    pub sender_timestamp: u32,
    pub text: String,
}

/// Direct text from a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub pub_key_prefix: [u8; PUB_KEY_PREFIX_SIZE],
    pub path_len: u8,
    pub txt_type: u8,
    pub sender_timestamp: u32,
    pub text: String,
}

/// A message pulled from the node's inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Contact(ContactMessage),
    Channel(ChannelMessage),
}

/// Repeater operational counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RepeaterStatus {
    pub batt_milli_volts: u16,
    pub curr_tx_queue_len: u16,
    pub noise_floor: i16,
    pub last_rssi: i16,
    pub n_packets_recv: u32,
    pub n_packets_sent: u32,
    pub total_air_time_secs: u32,
    pub total_up_time_secs: u32,
    pub n_sent_flood: u32,
    pub n_sent_direct: u32,
    pub n_recv_flood: u32,
    pub n_recv_direct: u32,
    pub err_events: u16,
    /// SNR in dB (wire value is quarter dB)
    pub last_snr: f32,
    pub n_direct_dups: u16,
    pub n_flood_dups: u16,
}

/// Cursor over a reply payload
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(AgentError::Protocol(format!(
                "reply too short: wanted {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Fixed-width, NUL padded string
    pub fn read_cstring(&mut self, width: usize) -> Result<String> {
        let raw = self.read_bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Everything left, as UTF-8 text
    pub fn read_rest_string(&mut self) -> String {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        String::from_utf8_lossy(&rest[..end]).into_owned()
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

// Request builders. Each returns a complete frame payload (code + body).

pub fn app_start_request(app_name: &str) -> Vec<u8> {
    let mut req = vec![CMD_APP_START, 1];
    req.extend_from_slice(&[0u8; 6]);
    req.extend_from_slice(app_name.as_bytes());
    req
}

pub fn device_query_request() -> Vec<u8> {
    vec![CMD_DEVICE_QUERY, SUPPORTED_PROTOCOL_VERSION]
}

pub fn set_device_time_request(epoch_secs: u32) -> Vec<u8> {
    let mut req = vec![CMD_SET_DEVICE_TIME];
    req.extend_from_slice(&epoch_secs.to_le_bytes());
    req
}

pub fn get_contacts_request() -> Vec<u8> {
    vec![CMD_GET_CONTACTS]
}

pub fn get_channel_request(index: u8) -> Vec<u8> {
    vec![CMD_GET_CHANNEL, index]
}

pub fn sync_next_message_request() -> Vec<u8> {
    vec![CMD_SYNC_NEXT_MESSAGE]
}

pub fn send_login_request(key: &PublicKey, password: &str) -> Vec<u8> {
    let mut req = vec![CMD_SEND_LOGIN];
    req.extend_from_slice(key.as_bytes());
    req.extend_from_slice(password.as_bytes());
    req
}

pub fn send_status_request(key: &PublicKey) -> Vec<u8> {
    let mut req = vec![CMD_SEND_STATUS_REQ];
    req.extend_from_slice(key.as_bytes());
    req
}

pub fn send_telemetry_request(key: &PublicKey) -> Vec<u8> {
    let mut req = vec![CMD_SEND_TELEMETRY_REQ, 0, 0, 0];
    req.extend_from_slice(key.as_bytes());
    req
}

pub fn send_channel_text_request(channel_idx: u8, epoch_secs: u32, text: &str) -> Vec<u8> {
    let mut req = vec![CMD_SEND_CHANNEL_TXT_MSG, 0, channel_idx];
    req.extend_from_slice(&epoch_secs.to_le_bytes());
    req.extend_from_slice(text.as_bytes());
    req
}

// Reply parsers. Each takes the body after the code byte.

pub fn parse_contact(body: &[u8]) -> Result<Contact> {
    let mut r = ByteReader::new(body);
    let public_key = PublicKey::from_slice(r.read_bytes(PUBLIC_KEY_SIZE)?)?;
    let kind = ContactType::from(r.read_u8()?);
    let flags = r.read_u8()?;
    let out_path_len = r.read_i8()?;
    r.read_bytes(64)?; // out_path
    let name = r.read_cstring(32)?;
    let last_advert = r.read_u32()?;
    let latitude = r.read_i32()? as f64 / 1_000_000.0;
    let longitude = r.read_i32()? as f64 / 1_000_000.0;

    Ok(Contact {
        public_key,
        kind,
        flags,
        out_path_len,
        name,
        last_advert,
        latitude,
        longitude,
    })
}

pub fn parse_channel_info(body: &[u8]) -> Result<Channel> {
    let mut r = ByteReader::new(body);
    let index = r.read_u8()?;
    let name = r.read_cstring(32)?;
    Ok(Channel { index, name })
}

pub fn parse_device_info(body: &[u8]) -> Result<DeviceInfo> {
    let mut r = ByteReader::new(body);
    let firmware_version = r.read_i8()?;
    r.read_bytes(6)?; // reserved
    let firmware_build_date = r.read_cstring(12)?;
    let model = r.read_rest_string();
    Ok(DeviceInfo {
        firmware_version,
        firmware_build_date,
        model,
    })
}

pub fn parse_channel_message(body: &[u8]) -> Result<ChannelMessage> {
    let mut r = ByteReader::new(body);
    Ok(ChannelMessage {
        channel_idx: r.read_u8()?,
        path_len: r.read_u8()?,
        txt_type: r.read_u8()?,
        sender_timestamp: r.read_u32()?,
        text: r.read_rest_string(),
    })
}

pub fn parse_contact_message(body: &[u8]) -> Result<ContactMessage> {
    let mut r = ByteReader::new(body);
    let mut pub_key_prefix = [0u8; PUB_KEY_PREFIX_SIZE];
    pub_key_prefix.copy_from_slice(r.read_bytes(PUB_KEY_PREFIX_SIZE)?);
    Ok(ContactMessage {
        pub_key_prefix,
        path_len: r.read_u8()?,
        txt_type: r.read_u8()?,
        sender_timestamp: r.read_u32()?,
        text: r.read_rest_string(),
    })
}

/// Parse a status push: reserved(1) + key prefix(6) + counters
pub fn parse_status_response(body: &[u8]) -> Result<([u8; PUB_KEY_PREFIX_SIZE], RepeaterStatus)> {
    let mut r = ByteReader::new(body);
    r.read_u8()?;
    let prefix = read_prefix(&mut r)?;
    let status = RepeaterStatus {
        batt_milli_volts: r.read_u16()?,
        curr_tx_queue_len: r.read_u16()?,
        noise_floor: r.read_i16()?,
        last_rssi: r.read_i16()?,
        n_packets_recv: r.read_u32()?,
        n_packets_sent: r.read_u32()?,
        total_air_time_secs: r.read_u32()?,
        total_up_time_secs: r.read_u32()?,
        n_sent_flood: r.read_u32()?,
        n_sent_direct: r.read_u32()?,
        n_recv_flood: r.read_u32()?,
        n_recv_direct: r.read_u32()?,
        err_events: r.read_u16()?,
        last_snr: r.read_i16()? as f32 / 4.0,
        n_direct_dups: r.read_u16()?,
        n_flood_dups: r.read_u16()?,
    };
    Ok((prefix, status))
}

/// Parse a telemetry push: reserved(1) + key prefix(6) + raw LPP buffer
pub fn parse_telemetry_response(body: &[u8]) -> Result<([u8; PUB_KEY_PREFIX_SIZE], Vec<u8>)> {
    let mut r = ByteReader::new(body);
    r.read_u8()?;
    let prefix = read_prefix(&mut r)?;
    Ok((prefix, r.read_rest().to_vec()))
}

/// Parse a login result push: reserved(1) + key prefix(6)
pub fn parse_login_response(body: &[u8]) -> Result<[u8; PUB_KEY_PREFIX_SIZE]> {
    let mut r = ByteReader::new(body);
    r.read_u8()?;
    read_prefix(&mut r)
}

/// Parse an advert push body: the advertiser's public key
pub fn parse_advert(body: &[u8]) -> Result<PublicKey> {
    let mut r = ByteReader::new(body);
    PublicKey::from_slice(r.read_bytes(PUBLIC_KEY_SIZE)?)
}

fn read_prefix(r: &mut ByteReader<'_>) -> Result<[u8; PUB_KEY_PREFIX_SIZE]> {
    let mut prefix = [0u8; PUB_KEY_PREFIX_SIZE];
    prefix.copy_from_slice(r.read_bytes(PUB_KEY_PREFIX_SIZE)?);
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> PublicKey {
        let mut bytes = [fill; PUBLIC_KEY_SIZE];
        bytes[0] = 0xAB;
        bytes[1] = 0xCD;
        PublicKey(bytes)
    }

    fn contact_body(k: &PublicKey, kind: u8, name: &str) -> Vec<u8> {
        let mut body = k.as_bytes().to_vec();
        body.push(kind);
        body.push(0); // flags
        body.push(0xFF); // out_path_len = -1
        body.extend_from_slice(&[0u8; 64]);
        let mut name_buf = [0u8; 32];
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        body.extend_from_slice(&name_buf);
        body.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        body.extend_from_slice(&52_500_000i32.to_le_bytes());
        body.extend_from_slice(&(-1_250_000i32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // lastmod
        body
    }

    #[test]
    fn test_push_codes_are_flagged() {
        assert!(is_push(PUSH_ADVERT));
        assert!(is_push(PUSH_TELEMETRY_RESPONSE));
        assert!(!is_push(RESP_CONTACT));
        assert!(!is_push(RESP_OK));
    }

    #[test]
    fn test_public_key_prefix_and_hex() {
        let k = key(0x11);
        assert!(k.starts_with(&[0xAB, 0xCD]));
        assert!(!k.starts_with(&[0xAB, 0xCE]));
        assert!(k.starts_with(&[]));
        assert!(k.to_hex().starts_with("abcd1111"));
        assert_eq!(k.to_hex().len(), 64);
    }

    #[test]
    fn test_public_key_wrong_length() {
        assert!(PublicKey::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_parse_contact() {
        let k = key(0x22);
        let contact = parse_contact(&contact_body(&k, 2, "Hilltop")).unwrap();
        assert_eq!(contact.public_key, k);
        assert_eq!(contact.kind, ContactType::Repeater);
        assert_eq!(contact.kind.label(), "Repeater");
        assert_eq!(contact.out_path_len, -1);
        assert_eq!(contact.name, "Hilltop");
        assert_eq!(contact.last_advert, 1_700_000_000);
        assert!((contact.latitude - 52.5).abs() < 1e-9);
        assert!((contact.longitude - (-1.25)).abs() < 1e-9);
    }

    #[test]
    fn test_parse_contact_truncated() {
        let k = key(0x22);
        let body = contact_body(&k, 1, "x");
        assert!(parse_contact(&body[..40]).is_err());
    }

    #[test]
    fn test_contact_type_labels() {
        assert_eq!(ContactType::from(0).label(), "None");
        assert_eq!(ContactType::from(1).label(), "Contact");
        assert_eq!(ContactType::from(3).label(), "Room");
        assert_eq!(ContactType::from(9).label(), "Unknown");
    }

    #[test]
    fn test_parse_channel_info() {
        let mut body = vec![2u8];
        let mut name = [0u8; 32];
        name[..5].copy_from_slice(b"admin");
        body.extend_from_slice(&name);
        body.extend_from_slice(&[0u8; 16]); // secret
        let channel = parse_channel_info(&body).unwrap();
        assert_eq!(channel.index, 2);
        assert_eq!(channel.name, "admin");
    }

    #[test]
    fn test_parse_device_info() {
        let mut body = vec![3u8];
        body.extend_from_slice(&[0u8; 6]);
        let mut date = [0u8; 12];
        date[..11].copy_from_slice(b"12 Mar 2025");
        body.extend_from_slice(&date);
        body.extend_from_slice(b"Heltec V3");
        let info = parse_device_info(&body).unwrap();
        assert_eq!(info.firmware_version, 3);
        assert_eq!(info.firmware_build_date, "12 Mar 2025");
        assert_eq!(info.model, "Heltec V3");
    }

    #[test]
    fn test_parse_channel_message() {
        let mut body = vec![1u8, 3, 0];
        body.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        body.extend_from_slice(b"alice: .ping");
        let msg = parse_channel_message(&body).unwrap();
        assert_eq!(msg.channel_idx, 1);
        assert_eq!(msg.path_len, 3);
        assert_eq!(msg.sender_timestamp, 1_700_000_000);
        assert_eq!(msg.text, "alice: .ping");
    }

    #[test]
    fn test_parse_status_response() {
        let mut body = vec![0u8, 1, 2, 3, 4, 5, 6];
        body.extend_from_slice(&4100u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&(-110i16).to_le_bytes());
        body.extend_from_slice(&(-70i16).to_le_bytes());
        for v in [10u32, 20, 30, 40, 50, 60, 70, 80] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.extend_from_slice(&5u16.to_le_bytes());
        body.extend_from_slice(&(-26i16).to_le_bytes());
        body.extend_from_slice(&7u16.to_le_bytes());
        body.extend_from_slice(&8u16.to_le_bytes());

        let (prefix, status) = parse_status_response(&body).unwrap();
        assert_eq!(prefix, [1, 2, 3, 4, 5, 6]);
        assert_eq!(status.batt_milli_volts, 4100);
        assert_eq!(status.noise_floor, -110);
        assert_eq!(status.last_rssi, -70);
        assert_eq!(status.n_packets_recv, 10);
        assert_eq!(status.n_recv_direct, 80);
        assert_eq!(status.err_events, 5);
        assert_eq!(status.last_snr, -6.5);
        assert_eq!(status.n_flood_dups, 8);
    }

    #[test]
    fn test_parse_status_response_too_short() {
        assert!(parse_status_response(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_parse_telemetry_response() {
        let body = [0u8, 9, 9, 9, 9, 9, 9, 1, 0x67, 0x00, 0x64];
        let (prefix, lpp) = parse_telemetry_response(&body).unwrap();
        assert_eq!(prefix, [9; 6]);
        assert_eq!(lpp, vec![1, 0x67, 0x00, 0x64]);
    }

    #[test]
    fn test_request_builders() {
        let k = key(0x33);
        let login = send_login_request(&k, "secret");
        assert_eq!(login[0], CMD_SEND_LOGIN);
        assert_eq!(&login[1..33], k.as_bytes());
        assert_eq!(&login[33..], b"secret");

        let telemetry = send_telemetry_request(&k);
        assert_eq!(telemetry.len(), 4 + PUBLIC_KEY_SIZE);
        assert_eq!(&telemetry[..4], &[CMD_SEND_TELEMETRY_REQ, 0, 0, 0]);

        let time = set_device_time_request(0x01020304);
        assert_eq!(time, vec![CMD_SET_DEVICE_TIME, 0x04, 0x03, 0x02, 0x01]);

        let text = send_channel_text_request(2, 0, "hi");
        assert_eq!(text, vec![CMD_SEND_CHANNEL_TXT_MSG, 0, 2, 0, 0, 0, 0, b'h', b'i']);
    }
}
