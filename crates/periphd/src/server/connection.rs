//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation and session admission
//! - Parses incoming messages
//! - Routes lease and control requests to the registry
//! - Pushes hardware events to the client via its `RemoteListener`
//!
//! There is deliberately no idle read timeout: a hung client keeps its
//! leases until its socket actually closes, at which point liveness
//! reporting reclaims everything.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use periph_core::SessionId;
use periph_hal::HardwareEvent;
use periph_protocol::{ClientMessage, DaemonMessage, ProtocolVersion, RequestKind};

use crate::events::{DeliveryError, EventListener, Listen};
use crate::liveness::LivenessToken;
use crate::registry::{RegistryError, RegistryHandle};

/// Shared writer handle: the message loop and the event router both write.
type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
///
/// Manages the lifecycle of a client connection including:
/// - Protocol handshake and session admission
/// - Message processing loop
/// - Listener registration over the connection's writer
/// - Graceful shutdown
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages (shared with event delivery)
    writer: SharedWriter,

    /// Handle to the lease registry
    registry: RegistryHandle,

    /// Session id (assigned after handshake)
    session_id: Option<SessionId>,

    /// Liveness token for this connection's session (assigned after
    /// handshake); the server reports it when the connection ends.
    liveness_token: Option<LivenessToken>,

    /// Counter for generating fallback identities
    connection_number: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: RegistryHandle,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            registry,
            session_id: None,
            liveness_token: None,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// This is the main entry point - performs handshake then enters the
    /// message processing loop. Returns the session's liveness token (if the
    /// handshake completed) so the server can report the connection lost.
    pub async fn run(mut self) -> Option<LivenessToken> {
        debug!(connection = self.connection_number, "New client connected");

        match self.handle_handshake().await {
            Ok(()) => {
                info!(
                    session_id = ?self.session_id,
                    "Client handshake completed"
                );
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
                return None;
            }
        }

        let token = self.liveness_token.clone();

        if let Err(e) = self.process_messages().await {
            debug!(
                session_id = ?self.session_id,
                error = %e,
                "Connection closed"
            );
        }

        info!(session_id = ?self.session_id, "Client disconnected");
        token
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `Connect` message from the client, validates the protocol
    /// version, admits the identity with the registry, and responds with
    /// `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.request {
            RequestKind::Connect { identity } => {
                let identity =
                    identity.unwrap_or_else(|| format!("conn-{}", self.connection_number));

                match self.registry.connect(identity).await {
                    Ok((session_id, token)) => {
                        self.send_message(DaemonMessage::connected(session_id.clone()))
                            .await?;
                        self.session_id = Some(session_id);
                        self.liveness_token = Some(token);
                        Ok(())
                    }
                    Err(e) => {
                        self.send_message(DaemonMessage::rejected(&e.to_string()))
                            .await?;
                        Err(ConnectionError::Registry(e.to_string()))
                    }
                }
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected connect message for handshake",
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main message processing loop.
    ///
    /// Reads and processes messages until the connection closes or an
    /// unrecoverable error occurs.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match self.read_message().await {
                Ok(msg) => msg,
                Err(ConnectionError::Eof) => {
                    debug!(session_id = ?self.session_id, "Client sent EOF");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => {
                    error!(
                        session_id = ?self.session_id,
                        error = %e,
                        "Error handling message"
                    );

                    // Send error response but continue processing
                    let _ = self
                        .send_message(DaemonMessage::error(&e.to_string()))
                        .await;
                }
            }
        }
    }

    /// Handles a single client message.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        let session_id = match &self.session_id {
            Some(id) => id.clone(),
            None => return Err(ConnectionError::NotConnected),
        };

        match msg.request {
            RequestKind::Connect { .. } => {
                // Already connected - send error
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            RequestKind::List { device } => {
                let names = self.registry.list_free(device).await;
                self.send_message(DaemonMessage::device_list(device, names))
                    .await?;
            }

            RequestKind::Open {
                device,
                name,
                address,
            } => {
                match self.registry.open(session_id, device, name, address).await {
                    Ok(index) => {
                        self.send_message(DaemonMessage::opened(device, index))
                            .await?;
                    }
                    Err(e) => self.send_registry_error(e).await?,
                }
            }

            RequestKind::Close { device, index } => {
                match self.registry.close(device, index).await {
                    Ok(closed) => {
                        self.send_message(DaemonMessage::closed(closed)).await?;
                    }
                    Err(e) => self.send_registry_error(e).await?,
                }
            }

            RequestKind::Control {
                device,
                index,
                request,
            } => match self.registry.control(device, index, request).await {
                Ok(response) => {
                    self.send_message(DaemonMessage::result(response)).await?;
                }
                Err(e) => self.send_registry_error(e).await?,
            },

            RequestKind::RegisterListener { device, index } => {
                let listener = Arc::new(RemoteListener::new(Arc::clone(&self.writer)));
                match self
                    .registry
                    .register_listener(session_id, device, index, listener)
                    .await
                {
                    Ok(()) => self.send_message(DaemonMessage::Ack).await?,
                    Err(e) => self.send_registry_error(e).await?,
                }
            }

            RequestKind::UnregisterListener { device, index } => {
                match self
                    .registry
                    .unregister_listener(session_id, device, index)
                    .await
                {
                    Ok(()) => self.send_message(DaemonMessage::Ack).await?,
                    Err(e) => self.send_registry_error(e).await?,
                }
            }

            RequestKind::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            RequestKind::Disconnect => {
                debug!(session_id = %session_id, "Client requested disconnect");
                // Graceful path: the registry unsubscribes liveness, so the
                // server's later report_lost is a no-op.
                let _ = self.registry.disconnect(session_id).await;
                self.send_message(DaemonMessage::Ack).await?;
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Sends a registry error as a wire error response with a stable code.
    async fn send_registry_error(&self, error: RegistryError) -> Result<(), ConnectionError> {
        self.send_message(DaemonMessage::error_with_code(
            &error.to_string(),
            error.code(),
        ))
        .await
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            session_id = ?self.session_id,
            request = ?std::mem::discriminant(&msg.request),
            "Received message"
        );

        Ok(msg)
    }

    /// Sends a message to the client.
    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_frame(&self.writer, &msg)
            .await
            .map_err(|e| match e {
                DeliveryError::Unreachable(detail) => ConnectionError::Io(detail),
            })
    }
}

/// Serializes and writes one line-delimited message, with a write timeout.
async fn write_frame(writer: &SharedWriter, msg: &DaemonMessage) -> Result<(), DeliveryError> {
    let json =
        serde_json::to_string(msg).map_err(|e| DeliveryError::Unreachable(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DeliveryError::Unreachable(e.to_string())),
        Err(_) => Err(DeliveryError::Unreachable("write timeout".to_string())),
    }
}

/// Pushes hardware events to a remote client over its connection writer.
///
/// The wire is one-way for events, so a remote listener never answers
/// `Stop`; remote clients stop by sending `unregister_listener`, and a dead
/// transport is reclaimed through liveness tracking rather than through the
/// delivery result.
pub struct RemoteListener {
    writer: SharedWriter,
}

impl RemoteListener {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl EventListener for RemoteListener {
    async fn deliver(&self, event: HardwareEvent) -> Result<Listen, DeliveryError> {
        write_frame(&self.writer, &DaemonMessage::event(event.device, event.index)).await?;
        Ok(Listen::Continue)
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Not connected")]
    NotConnected,

    #[error("Registry error: {0}")]
    Registry(String),
}
