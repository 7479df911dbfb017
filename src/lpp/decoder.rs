//! # Cayenne LPP Decoder
//!
//! Decodes a raw LPP sensor buffer into an ordered list of readings.
//!
//! Decoding is best effort: it stops at the first record it cannot decode
//! (unknown type code or a value running past the end of the buffer) and
//! returns everything decoded before that point.

use super::protocol::*;
use crate::error::AgentError;

/// Outcome of decoding one buffer
#[derive(Debug)]
pub struct DecodeReport {
    /// Readings in encounter order
    pub readings: Vec<SensorReading>,

    /// Why decoding stopped early, `None` when the whole buffer was consumed
    pub halted: Option<AgentError>,
}

/// Decode an LPP buffer, discarding the halt diagnostic
///
/// # Examples
///
/// ```
/// use meshcore_agent::lpp::decoder::decode;
/// use meshcore_agent::lpp::protocol::SensorValue;
///
/// let readings = decode(&[1, 0x67, 0x00, 0x64]);
/// assert_eq!(readings.len(), 1);
/// assert_eq!(readings[0].value, SensorValue::Scalar(10.0));
/// ```
pub fn decode(buffer: &[u8]) -> Vec<SensorReading> {
    decode_report(buffer).readings
}

/// Decode an LPP buffer and report where and why decoding stopped
pub fn decode_report(buffer: &[u8]) -> DecodeReport {
    let mut readings = Vec::new();
    let mut i = 0;

    while i < buffer.len() {
        if buffer.len() - i < LPP_HEADER_SIZE {
            return DecodeReport {
                readings,
                halted: Some(AgentError::DecodeTruncated {
                    offset: i,
                    type_code: 0,
                    needed: LPP_HEADER_SIZE,
                    available: buffer.len() - i,
                }),
            };
        }

        let channel = buffer[i];
        let type_code = buffer[i + 1];

        let Some(kind) = LppType::from_code(type_code) else {
            return DecodeReport {
                readings,
                halted: Some(AgentError::DecodeUnknownType { offset: i, type_code }),
            };
        };

        let start = i + LPP_HEADER_SIZE;
        let size = kind.payload_size();
        let Some(payload) = buffer.get(start..start + size) else {
            return DecodeReport {
                readings,
                halted: Some(AgentError::DecodeTruncated {
                    offset: i,
                    type_code,
                    needed: size,
                    available: buffer.len() - start,
                }),
            };
        };

        readings.push(SensorReading {
            channel,
            type_code,
            value: decode_value(kind, payload),
        });
        i = start + size;
    }

    DecodeReport {
        readings,
        halted: None,
    }
}

/// Scale a value whose width has already been checked against the type table
fn decode_value(kind: LppType, payload: &[u8]) -> SensorValue {
    match kind {
        LppType::DigitalInput | LppType::DigitalOutput | LppType::Presence => {
            SensorValue::Scalar(payload[0] as f64)
        }
        LppType::Humidity => SensorValue::Scalar(payload[0] as f64 / 2.0),
        LppType::AnalogInput | LppType::AnalogOutput => {
            SensorValue::Scalar(i16_be(payload, 0) as f64 / 100.0)
        }
        LppType::Illuminance => SensorValue::Scalar(u16_be(payload, 0) as f64),
        LppType::Temperature => SensorValue::Scalar(i16_be(payload, 0) as f64 / 10.0),
        LppType::Barometer => SensorValue::Scalar(u16_be(payload, 0) as f64 / 10.0),
        LppType::Accelerometer => vector3(payload, 1000.0),
        LppType::Gyrometer => vector3(payload, 100.0),
        LppType::GpsLocation => SensorValue::GeoPoint {
            latitude: i32_be(payload, 0) as f64 / 10_000.0,
            longitude: i32_be(payload, 4) as f64 / 10_000.0,
            altitude: i32_be(payload, 8) as f64 / 100.0,
        },
    }
}

fn vector3(payload: &[u8], divisor: f64) -> SensorValue {
    SensorValue::Vector3 {
        x: i16_be(payload, 0) as f64 / divisor,
        y: i16_be(payload, 2) as f64 / divisor,
        z: i16_be(payload, 4) as f64 / divisor,
    }
}

fn u16_be(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn i16_be(b: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([b[at], b[at + 1]])
}

fn i32_be(b: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}
