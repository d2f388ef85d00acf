//! Periph Protocol - Wire protocol for daemon communication
//!
//! This crate provides message types for communication between peripheral
//! clients and the periphd daemon: line-delimited JSON with a versioned
//! handshake, plus the per-device control operation payloads.

pub mod message;
pub mod request;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, RequestKind};
pub use request::{DeviceRequest, DeviceResponse, MAX_TRANSFER};
pub use version::ProtocolVersion;
