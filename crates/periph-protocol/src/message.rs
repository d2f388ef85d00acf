//! Protocol message types for daemon communication.

use crate::request::{DeviceRequest, DeviceResponse};
use crate::version::ProtocolVersion;
use periph_core::{DeviceType, SessionId};
use serde::{Deserialize, Serialize};

/// Request kinds that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    /// Client handshake/connection request.
    Connect {
        /// Connection identity (typically the client's pid as a string).
        /// When absent the daemon assigns a per-connection identity.
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
    },

    /// List currently free resources of a device type.
    List { device: DeviceType },

    /// Open a named resource for exclusive use.
    Open {
        device: DeviceType,
        name: String,
        /// Slave address, required for I2C, ignored otherwise.
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<u16>,
    },

    /// Close an open slot by index.
    Close { device: DeviceType, index: u32 },

    /// A control or data operation on an open slot.
    Control {
        device: DeviceType,
        index: u32,
        request: DeviceRequest,
    },

    /// Register this connection as the slot's event listener.
    RegisterListener { device: DeviceType, index: u32 },

    /// Remove this connection's listener registration, if current.
    UnregisterListener { device: DeviceType, index: u32 },

    /// Ping to check connection.
    Ping { seq: u64 },

    /// Client disconnecting gracefully.
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version.
    pub protocol_version: ProtocolVersion,

    /// Message payload.
    #[serde(flatten)]
    pub request: RequestKind,
}

impl ClientMessage {
    /// Creates a new client message with the current protocol version.
    pub fn new(request: RequestKind) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            request,
        }
    }

    pub fn connect(identity: Option<String>) -> Self {
        Self::new(RequestKind::Connect { identity })
    }

    pub fn list(device: DeviceType) -> Self {
        Self::new(RequestKind::List { device })
    }

    pub fn open(device: DeviceType, name: impl Into<String>) -> Self {
        Self::new(RequestKind::Open {
            device,
            name: name.into(),
            address: None,
        })
    }

    pub fn open_i2c(name: impl Into<String>, address: u16) -> Self {
        Self::new(RequestKind::Open {
            device: DeviceType::I2c,
            name: name.into(),
            address: Some(address),
        })
    }

    pub fn close(device: DeviceType, index: u32) -> Self {
        Self::new(RequestKind::Close { device, index })
    }

    pub fn control(device: DeviceType, index: u32, request: DeviceRequest) -> Self {
        Self::new(RequestKind::Control {
            device,
            index,
            request,
        })
    }

    pub fn register_listener(device: DeviceType, index: u32) -> Self {
        Self::new(RequestKind::RegisterListener { device, index })
    }

    pub fn unregister_listener(device: DeviceType, index: u32) -> Self {
        Self::new(RequestKind::UnregisterListener { device, index })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(RequestKind::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(RequestKind::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted.
    Connected {
        protocol_version: ProtocolVersion,
        session_id: SessionId,
    },

    /// Connection rejected (version mismatch, capacity).
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Free-resource list for a device type.
    DeviceList {
        device: DeviceType,
        names: Vec<String>,
    },

    /// Open succeeded; the slot index used by all further calls.
    Opened { device: DeviceType, index: u32 },

    /// Close result. `closed` is false when the slot was already closed.
    Closed { closed: bool },

    /// Result of a control operation.
    Result { response: DeviceResponse },

    /// Generic acknowledgement (listener registration, disconnect).
    Ack,

    /// Asynchronous hardware event on a slot this client listens to.
    Event { device: DeviceType, index: u32 },

    /// Pong response to ping.
    Pong { seq: u64 },

    /// Error response.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(session_id: SessionId) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            session_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn device_list(device: DeviceType, names: Vec<String>) -> Self {
        Self::DeviceList { device, names }
    }

    pub fn opened(device: DeviceType, index: u32) -> Self {
        Self::Opened { device, index }
    }

    pub fn closed(closed: bool) -> Self {
        Self::Closed { closed }
    }

    pub fn result(response: DeviceResponse) -> Self {
        Self::Result { response }
    }

    pub fn event(device: DeviceType, index: u32) -> Self {
        Self::Event { device, index }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
    }

    #[test]
    fn test_daemon_message_serialization() {
        let msg = DaemonMessage::connected(SessionId::new("4242"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"session_id\":\"4242\""));
    }

    #[test]
    fn test_open_roundtrip() {
        let original = ClientMessage::open_i2c("I2C-1", 0x48);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();

        match parsed.request {
            RequestKind::Open {
                device,
                name,
                address,
            } => {
                assert_eq!(device, DeviceType::I2c);
                assert_eq!(name, "I2C-1");
                assert_eq!(address, Some(0x48));
            }
            _ => panic!("Expected Open request"),
        }
    }

    #[test]
    fn test_event_roundtrip() {
        let msg = DaemonMessage::event(DeviceType::Gpio, 4);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            DaemonMessage::Event { device, index } => {
                assert_eq!(device, DeviceType::Gpio);
                assert_eq!(index, 4);
            }
            other => panic!("Expected Event, got {other:?}"),
        }
    }

    #[test]
    fn test_control_message_embeds_request() {
        let msg = ClientMessage::control(
            DeviceType::Pwm,
            1,
            DeviceRequest::PwmSetFrequencyHz { frequency_hz: 50.0 },
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"op\":\"pwm_set_frequency_hz\""));
    }
}
