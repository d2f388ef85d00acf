//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor. Channel errors are mapped to
//! `RegistryError::ChannelClosed`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use periph_core::{DeviceType, SessionId};
use periph_protocol::{DeviceRequest, DeviceResponse};

use crate::events::EventListener;
use crate::liveness::LivenessToken;

use super::commands::{RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Admits a client identity and returns its session id together with
    /// the liveness token to report when the connection ends.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn connect(
        &self,
        identity: impl Into<String>,
    ) -> Result<(SessionId, LivenessToken), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Connect {
                identity: identity.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Gracefully ends a session, releasing all of its leases.
    ///
    /// Returns false if the session was already gone.
    pub async fn disconnect(&self, session_id: SessionId) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Disconnect {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Lists resources of a device type currently available for opening.
    ///
    /// Returns an empty list if communication with the actor fails.
    pub async fn list_free(&self, device: DeviceType) -> Vec<String> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListFree {
                device,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Opens a named resource exclusively for a session.
    ///
    /// Returns the slot index used by all further calls.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotAvailable` if the name is unknown or held
    /// - `RegistryError::UnknownSession` if the session doesn't exist
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn open(
        &self,
        session_id: SessionId,
        device: DeviceType,
        name: impl Into<String>,
        address: Option<u16>,
    ) -> Result<u32, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Open {
                session_id,
                device,
                name: name.into(),
                address,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Closes an open slot. Returns false if it was already closed.
    pub async fn close(&self, device: DeviceType, index: u32) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Close {
                device,
                index,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Executes a control or data operation on an open slot.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotOpen` if the slot is not open
    /// - `RegistryError::InvalidArgument` on range or type mismatch
    /// - `RegistryError::Driver` if the native call fails
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn control(
        &self,
        device: DeviceType,
        index: u32,
        request: DeviceRequest,
    ) -> Result<DeviceResponse, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Control {
                device,
                index,
                request,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Registers a listener on a slot, replacing any previous one.
    pub async fn register_listener(
        &self,
        session_id: SessionId,
        device: DeviceType,
        index: u32,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::RegisterListener {
                session_id,
                device,
                index,
                listener,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a session's listener registration from a slot, if current.
    pub async fn unregister_listener(
        &self,
        session_id: SessionId,
        device: DeviceType,
        index: u32,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::UnregisterListener {
                session_id,
                device,
                index,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
