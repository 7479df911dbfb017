//! # Companion Frame Codec
//!
//! Serial frames are `marker(1) + length(2, LE) + payload(length)`.
//! Outbound frames use `<`, inbound frames use `>`.
//!
//! [`FrameDecoder`] is fed arbitrary chunks read from the port and yields whole
//! payloads when available. Bytes that cannot start a frame are dropped so the
//! stream resynchronises after line noise.

use bytes::{Buf, BytesMut};

use super::protocol::{FRAME_MARKER_INBOUND, FRAME_MARKER_OUTBOUND, MAX_FRAME_SIZE};

/// Frame header size (marker + length)
const FRAME_HEADER_SIZE: usize = 3;

/// Wrap a payload into an outbound frame
///
/// # Examples
///
/// ```
/// use meshcore_agent::companion::codec::encode_frame;
///
/// let frame = encode_frame(&[0x16, 0x01]);
/// assert_eq!(frame, vec![0x3C, 0x02, 0x00, 0x16, 0x01]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.push(FRAME_MARKER_OUTBOUND);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental decoder for inbound frames
pub struct FrameDecoder {
    buf: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete payload, if any
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Skip to the next frame marker
            match self.buf.iter().position(|&b| b == FRAME_MARKER_INBOUND) {
                Some(0) => {}
                Some(skip) => self.buf.advance(skip),
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < FRAME_HEADER_SIZE {
                return None;
            }

            let len = u16::from_le_bytes([self.buf[1], self.buf[2]]) as usize;
            if len == 0 || len > MAX_FRAME_SIZE {
                // Not a plausible header; drop the marker and rescan
                self.buf.advance(1);
                continue;
            }

            if self.buf.len() < FRAME_HEADER_SIZE + len {
                return None;
            }

            self.buf.advance(FRAME_HEADER_SIZE);
            return Some(self.buf.split_to(len).to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![FRAME_MARKER_INBOUND];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_encode_frame_header() {
        let frame = encode_frame(&[1, 2, 3]);
        assert_eq!(frame[0], FRAME_MARKER_OUTBOUND);
        assert_eq!(&frame[1..3], &[3, 0]);
        assert_eq!(&frame[3..], &[1, 2, 3]);
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&inbound(&[0x83]));
        assert_eq!(decoder.next_frame(), Some(vec![0x83]));
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decode_split_across_chunks() {
        let frame = inbound(&[5, 6, 7, 8]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..2]);
        assert_eq!(decoder.next_frame(), None);
        decoder.push(&frame[2..5]);
        assert_eq!(decoder.next_frame(), None);
        decoder.push(&frame[5..]);
        assert_eq!(decoder.next_frame(), Some(vec![5, 6, 7, 8]));
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut bytes = inbound(&[1]);
        bytes.extend(inbound(&[2, 2]));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Some(vec![1]));
        assert_eq!(decoder.next_frame(), Some(vec![2, 2]));
        assert_eq!(decoder.next_frame(), None);
    }

    #[test]
    fn test_decode_resyncs_after_noise() {
        let mut bytes = vec![0x00, 0xFF, 0x12];
        bytes.extend(inbound(&[0x80, 0x01]));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Some(vec![0x80, 0x01]));
    }

    #[test]
    fn test_decode_rejects_oversize_length() {
        // marker followed by an absurd length, then a real frame
        let mut bytes = vec![FRAME_MARKER_INBOUND, 0xFF, 0xFF];
        bytes.extend(inbound(&[0x0A]));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Some(vec![0x0A]));
    }

    #[test]
    fn test_decode_noise_only_is_discarded() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[1, 2, 3, 4]);
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.pending(), 0);
    }
}
