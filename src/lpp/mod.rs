//! # Cayenne LPP Module
//!
//! Decoder for the Cayenne Low Power Payload telemetry returned by repeaters.
//!
//! This module handles:
//! - The fixed type-code table (widths and scaling)
//! - Best-effort decoding of variable length sensor streams

pub mod protocol;
pub mod decoder;
