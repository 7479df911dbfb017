//! # Cayenne LPP Type Table and Reading Types
//!
//! Each LPP record is `channel(1) + type(1) + value(N)` where `N` is fixed by
//! the type code. There is no per-record length field.

use serde::Serialize;

/// Size of the per-record header (channel + type)
pub const LPP_HEADER_SIZE: usize = 2;

pub const LPP_DIGITAL_INPUT: u8 = 0x00;
pub const LPP_DIGITAL_OUTPUT: u8 = 0x01;
pub const LPP_ANALOG_INPUT: u8 = 0x02;
pub const LPP_ANALOG_OUTPUT: u8 = 0x03;
pub const LPP_ILLUMINANCE: u8 = 0x65;
pub const LPP_PRESENCE: u8 = 0x66;
pub const LPP_TEMPERATURE: u8 = 0x67;
pub const LPP_HUMIDITY: u8 = 0x68;
pub const LPP_ACCELEROMETER: u8 = 0x71;
pub const LPP_BAROMETER: u8 = 0x73;
pub const LPP_GYROMETER: u8 = 0x86;
pub const LPP_GPS: u8 = 0x88;

/// Supported LPP sensor types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LppType {
    DigitalInput,
    DigitalOutput,
    AnalogInput,
    AnalogOutput,
    Illuminance,
    Presence,
    Temperature,
    Humidity,
    Accelerometer,
    Barometer,
    Gyrometer,
    GpsLocation,
}

impl LppType {
    /// Look up a type code, `None` for anything outside the table
    pub fn from_code(code: u8) -> Option<Self> {
        let kind = match code {
            LPP_DIGITAL_INPUT => Self::DigitalInput,
            LPP_DIGITAL_OUTPUT => Self::DigitalOutput,
            LPP_ANALOG_INPUT => Self::AnalogInput,
            LPP_ANALOG_OUTPUT => Self::AnalogOutput,
            LPP_ILLUMINANCE => Self::Illuminance,
            LPP_PRESENCE => Self::Presence,
            LPP_TEMPERATURE => Self::Temperature,
            LPP_HUMIDITY => Self::Humidity,
            LPP_ACCELEROMETER => Self::Accelerometer,
            LPP_BAROMETER => Self::Barometer,
            LPP_GYROMETER => Self::Gyrometer,
            LPP_GPS => Self::GpsLocation,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::DigitalInput => LPP_DIGITAL_INPUT,
            Self::DigitalOutput => LPP_DIGITAL_OUTPUT,
            Self::AnalogInput => LPP_ANALOG_INPUT,
            Self::AnalogOutput => LPP_ANALOG_OUTPUT,
            Self::Illuminance => LPP_ILLUMINANCE,
            Self::Presence => LPP_PRESENCE,
            Self::Temperature => LPP_TEMPERATURE,
            Self::Humidity => LPP_HUMIDITY,
            Self::Accelerometer => LPP_ACCELEROMETER,
            Self::Barometer => LPP_BAROMETER,
            Self::Gyrometer => LPP_GYROMETER,
            Self::GpsLocation => LPP_GPS,
        }
    }

    /// Width of the value that follows the header
    pub fn payload_size(self) -> usize {
        match self {
            Self::DigitalInput | Self::DigitalOutput | Self::Presence | Self::Humidity => 1,
            Self::AnalogInput
            | Self::AnalogOutput
            | Self::Illuminance
            | Self::Temperature
            | Self::Barometer => 2,
            Self::Accelerometer | Self::Gyrometer => 6,
            Self::GpsLocation => 12,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DigitalInput => "digital_input",
            Self::DigitalOutput => "digital_output",
            Self::AnalogInput => "analog_input",
            Self::AnalogOutput => "analog_output",
            Self::Illuminance => "illuminance",
            Self::Presence => "presence",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Accelerometer => "accelerometer",
            Self::Barometer => "barometer",
            Self::Gyrometer => "gyrometer",
            Self::GpsLocation => "gps",
        }
    }
}

/// Decoded value of one LPP record
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Scalar(f64),
    Vector3 { x: f64, y: f64, z: f64 },
    GeoPoint {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
}

impl SensorValue {
    /// Flatten to up to three columns, in declaration order
    pub fn components(&self) -> Vec<f64> {
        match *self {
            Self::Scalar(v) => vec![v],
            Self::Vector3 { x, y, z } => vec![x, y, z],
            Self::GeoPoint {
                latitude,
                longitude,
                altitude,
            } => vec![latitude, longitude, altitude],
        }
    }
}

/// One decoded LPP record
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    /// Sensor channel
    pub channel: u8,

    /// Raw LPP type code
    pub type_code: u8,

    /// Scaled value
    pub value: SensorValue,
}

impl SensorReading {
    /// Human readable type name (`"unknown"` never occurs for decoded readings)
    pub fn type_name(&self) -> &'static str {
        LppType::from_code(self.type_code)
            .map(LppType::name)
            .unwrap_or("unknown")
    }
}
