//! # MeshCore Agent Library
//!
//! Unattended field agent for a MeshCore mesh node reachable over serial.
//!
//! The agent keeps the node's clock in sync, answers simple channel commands
//! and periodically logs status or Cayenne LPP telemetry from a repeater that
//! is located by public key prefix and logged into with a password.

pub mod agent;
pub mod cli;
pub mod companion;
pub mod config;
pub mod error;
pub mod logging;
pub mod lpp;
pub mod sink;
