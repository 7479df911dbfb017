//! # Error Types
//!
//! Custom error types for the MeshCore agent using `thiserror`.
//!
//! Every variant is caught at the boundary where it occurs and logged; none of
//! them is allowed to take the long-running agent down.

use thiserror::Error;

/// Main error type for the MeshCore agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connect or reconnect to the local node failed
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A request was issued while no link to the node is open
    #[error("Not connected to the companion node")]
    NotConnected,

    /// A post-connect setup step (device query, clock sync, enumeration) failed
    #[error("Setup step '{step}' failed: {reason}")]
    SetupStepFailed {
        step: &'static str,
        reason: String,
    },

    /// No contact matches the configured public-key prefix
    #[error("Repeater contact not found for prefix {0}")]
    TargetNotFound(String),

    /// The repeater rejected the login
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Status or telemetry retrieval failed
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// An LPP record runs past the end of the buffer
    #[error("LPP record 0x{type_code:02X} at offset {offset} truncated: needs {needed} bytes, {available} available")]
    DecodeTruncated {
        offset: usize,
        type_code: u8,
        needed: usize,
        available: usize,
    },

    /// An LPP record carries a type code outside the supported table
    #[error("Unknown LPP type 0x{type_code:02X} at offset {offset}")]
    DecodeUnknownType { offset: usize, type_code: u8 },

    /// Companion protocol errors (malformed or unexpected frames)
    #[error("Companion protocol error: {0}")]
    Protocol(String),

    /// The node did not answer within the request timeout
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Invalid user-supplied values (CLI or config)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the MeshCore agent
pub type Result<T> = std::result::Result<T, AgentError>;
