//! Registry actor commands and errors.
//!
//! This module defines the message types for communicating with the
//! `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use periph_core::{DeviceType, DomainError, SessionId};
use periph_protocol::{DeviceRequest, DeviceResponse};

use crate::events::EventListener;
use crate::liveness::LivenessToken;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each request-response command carries a oneshot channel for the reply.
/// `SessionLost` is fire-and-forget: it is sent from liveness cleanup
/// callbacks that cannot wait for a response.
pub enum RegistryCommand {
    /// Admit a client and create (or replace) its session.
    ///
    /// Responds with the session id and the liveness token the connection
    /// reports when it ends.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Connect {
        /// Stable client identity (typically its pid as a string).
        identity: String,
        respond_to: oneshot::Sender<Result<(SessionId, LivenessToken), RegistryError>>,
    },

    /// Gracefully end a session, releasing all of its leases.
    ///
    /// Responds with false if the session was already gone.
    Disconnect {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// A client died without disconnecting. Releases all of its leases.
    ///
    /// Fire-and-forget: sent from liveness callbacks. The epoch pins the
    /// report to the session incarnation it was subscribed for, so a report
    /// queued behind a same-identity reconnect cannot kill the successor.
    SessionLost { session_id: SessionId, epoch: u64 },

    /// List resources of a device type currently available for opening.
    ListFree {
        device: DeviceType,
        respond_to: oneshot::Sender<Vec<String>>,
    },

    /// Open a named resource exclusively for a session.
    ///
    /// # Errors
    /// - `RegistryError::NotAvailable` if the name is unknown or already held
    /// - `RegistryError::UnknownSession` if the session doesn't exist
    /// - `RegistryError::InvalidArgument` if I2C is opened without an address
    Open {
        session_id: SessionId,
        device: DeviceType,
        name: String,
        /// Slave address, required for I2C.
        address: Option<u16>,
        respond_to: oneshot::Sender<Result<u32, RegistryError>>,
    },

    /// Close an open slot. Responds with false if it was already closed.
    Close {
        device: DeviceType,
        index: u32,
        respond_to: oneshot::Sender<Result<bool, RegistryError>>,
    },

    /// A control or data operation on an open slot.
    ///
    /// # Errors
    /// - `RegistryError::NotOpen` if the slot is not open
    /// - `RegistryError::InvalidArgument` on range or device-type mismatch
    /// - `RegistryError::Driver` if the native call fails
    Control {
        device: DeviceType,
        index: u32,
        request: DeviceRequest,
        respond_to: oneshot::Sender<Result<DeviceResponse, RegistryError>>,
    },

    /// Register a listener on a slot, replacing any previous one.
    ///
    /// # Errors
    /// - `RegistryError::UnknownSession` if the session doesn't exist
    /// - `RegistryError::NotOpen` if the slot is not open
    /// - `RegistryError::InvalidArgument` if the device has no event source
    ///   or a GPIO slot is not configured as an input
    RegisterListener {
        session_id: SessionId,
        device: DeviceType,
        index: u32,
        listener: Arc<dyn EventListener>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session's listener registration from a slot, if current.
    UnregisterListener {
        session_id: SessionId,
        device: DeviceType,
        index: u32,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },
}

impl std::fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Listener trait objects aren't Debug; print the command shape only.
        let name = match self {
            Self::Connect { .. } => "Connect",
            Self::Disconnect { .. } => "Disconnect",
            Self::SessionLost { .. } => "SessionLost",
            Self::ListFree { .. } => "ListFree",
            Self::Open { .. } => "Open",
            Self::Close { .. } => "Close",
            Self::Control { .. } => "Control",
            Self::RegisterListener { .. } => "RegisterListener",
            Self::UnregisterListener { .. } => "UnregisterListener",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The named resource doesn't exist or is already held by someone.
    ///
    /// The two cases are deliberately indistinguishable to callers.
    #[error("{device} resource not available: {name}")]
    NotAvailable { device: DeviceType, name: String },

    /// The session doesn't exist (never connected, or already cleaned up).
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The addressed slot is not open.
    #[error("{device} slot {index} is not open")]
    NotOpen { device: DeviceType, index: u32 },

    /// An argument failed validation before reaching the driver.
    #[error(transparent)]
    InvalidArgument(#[from] DomainError),

    /// The native driver call failed.
    #[error("driver error: {0}")]
    Driver(String),

    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull { max: usize },

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// Stable machine-readable code, carried in wire error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAvailable { .. } => "not_available",
            Self::UnknownSession(_) => "unknown_session",
            Self::NotOpen { .. } => "not_open",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Driver(_) => "driver",
            Self::RegistryFull { .. } => "registry_full",
            Self::ChannelClosed => "channel_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotAvailable {
            device: DeviceType::Gpio,
            name: "GPIO_A".to_string(),
        };
        assert_eq!(err.to_string(), "gpio resource not available: GPIO_A");

        let err = RegistryError::NotOpen {
            device: DeviceType::Uart,
            index: 1,
        };
        assert_eq!(err.to_string(), "uart slot 1 is not open");

        let err = RegistryError::RegistryFull { max: 100 };
        assert_eq!(err.to_string(), "registry is full (max: 100 sessions)");

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "response channel closed");
    }

    #[test]
    fn test_domain_error_conversion() {
        let domain = DomainError::invalid("mode", 7, "0..=3");
        let err: RegistryError = domain.into();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            RegistryError::NotAvailable {
                device: DeviceType::I2c,
                name: "I2C-1".to_string(),
            }
            .code(),
            "not_available"
        );
        assert_eq!(RegistryError::Driver("io".to_string()).code(), "driver");
        assert_eq!(
            RegistryError::UnknownSession(SessionId::new("x")).code(),
            "unknown_session"
        );
    }

    #[tokio::test]
    async fn test_command_oneshot_pattern() {
        let (tx, rx) = oneshot::channel::<Result<u32, RegistryError>>();

        tokio::spawn(async move {
            tx.send(Ok(3)).ok();
        });

        let result = rx.await;
        assert!(matches!(result, Ok(Ok(3))));
    }
}
