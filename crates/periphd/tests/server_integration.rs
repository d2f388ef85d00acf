//! Integration tests for the Unix socket server.
//!
//! These tests run the full daemon stack (simulated driver, registry, event
//! pump, server) against real client connections over a Unix socket, and
//! verify connection handling, lease arbitration over the wire, event
//! delivery, and graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use periph_core::{DeviceType, GpioDirection};
use periph_hal::{PeripheralDriver, SimDriver};
use periph_protocol::{
    ClientMessage, DaemonMessage, DeviceRequest, DeviceResponse, ProtocolVersion, RequestKind,
};
use periphd::events::{spawn_event_pump, EventRouter};
use periphd::liveness::LivenessMonitor;
use periphd::registry::spawn_registry;
use periphd::server::DaemonServer;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for async cleanup (disconnects, liveness reports)
const SETTLE_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages daemon lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    cancel_token: CancellationToken,
    /// Kept so tests can inject simulated hardware interrupts.
    driver: Arc<SimDriver>,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    /// Spawns the full daemon stack in the background.
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let (driver, hardware_events) = SimDriver::with_defaults();
        let driver = Arc::new(driver);
        let router = Arc::new(EventRouter::new());
        let liveness = Arc::new(LivenessMonitor::new());
        let cancel_token = CancellationToken::new();

        let registry = spawn_registry(
            Arc::clone(&driver) as Arc<dyn PeripheralDriver>,
            Arc::clone(&router),
            Arc::clone(&liveness),
        );
        let _pump = spawn_event_pump(hardware_events, router, cancel_token.clone());

        let server = DaemonServer::new(socket_path.clone(), registry, liveness, cancel_token.clone());

        // Spawn server in background
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Wait for socket to be ready with timeout
        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }

        // Fail fast if socket didn't appear
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            cancel_token,
            driver,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a client connection to the server.
    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Shuts down the server gracefully.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SETTLE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends a message to the server.
    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.writer.write_all(json.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives a message from the server.
    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Performs handshake with an optional identity.
    async fn handshake(&mut self, identity: Option<&str>) -> String {
        self.send(ClientMessage::connect(identity.map(String::from)))
            .await;

        match self.recv().await {
            DaemonMessage::Connected { session_id, .. } => session_id.to_string(),
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    /// Performs handshake with a specific protocol version.
    async fn handshake_with_version(&mut self, version: ProtocolVersion) -> DaemonMessage {
        let msg = ClientMessage {
            protocol_version: version,
            request: RequestKind::Connect { identity: None },
        };
        self.send(msg).await;
        self.recv().await
    }

    /// Opens a named resource and returns its slot index.
    async fn open(&mut self, device: DeviceType, name: &str) -> u32 {
        self.send(ClientMessage::open(device, name)).await;
        match self.recv().await {
            DaemonMessage::Opened { index, .. } => index,
            other => panic!("Expected Opened for {name}, got {other:?}"),
        }
    }

    /// Opens an I2C device and returns its slot index.
    async fn open_i2c(&mut self, bus: &str, address: u16) -> u32 {
        self.send(ClientMessage::open_i2c(bus, address)).await;
        match self.recv().await {
            DaemonMessage::Opened { index, .. } => index,
            other => panic!("Expected Opened for {bus}, got {other:?}"),
        }
    }

    /// Closes a slot and returns whether it was actually closed.
    async fn close(&mut self, device: DeviceType, index: u32) -> bool {
        self.send(ClientMessage::close(device, index)).await;
        match self.recv().await {
            DaemonMessage::Closed { closed } => closed,
            other => panic!("Expected Closed, got {other:?}"),
        }
    }

    /// Asserts the next message is an Error with the given code.
    async fn expect_error_code(&mut self, expected: &str) {
        match self.recv().await {
            DaemonMessage::Error { code, message } => {
                assert_eq!(
                    code.as_deref(),
                    Some(expected),
                    "Expected error code {expected}, got {code:?} ({message})"
                );
            }
            other => panic!("Expected Error with code {expected}, got {other:?}"),
        }
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_server_accepts_connection() {
    let server = TestServer::spawn().await;

    // Should be able to connect
    let _client = server.connect().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_success() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::connect(Some("4242".to_string()))).await;

    match client.recv().await {
        DaemonMessage::Connected {
            protocol_version,
            session_id,
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
            assert_eq!(session_id.as_str(), "4242");
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_auto_assigns_identity() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::connect(None)).await;

    match client.recv().await {
        DaemonMessage::Connected { session_id, .. } => {
            assert!(
                session_id.as_str().starts_with("conn-"),
                "Expected auto-assigned identity starting with 'conn-', got: {session_id}"
            );
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let response = client
        .handshake_with_version(ProtocolVersion::new(99, 0))
        .await;

    match response {
        DaemonMessage::Rejected { reason, .. } => {
            assert!(
                reason.contains("not compatible"),
                "Expected 'not compatible' in reason, got: {reason}"
            );
        }
        other => panic!("Expected Rejected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_wrong_message_before_handshake() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::list(DeviceType::Gpio)).await;

    match client.recv().await {
        DaemonMessage::Error { message, .. } => {
            assert!(
                message.contains("Expected connect"),
                "Error should mention expected connect message, got: {message}"
            );
        }
        other => panic!("Expected Error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_connect_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.handshake(None).await;

    client.send(ClientMessage::connect(None)).await;

    match client.recv().await {
        DaemonMessage::Error { message, .. } => {
            assert!(
                message.contains("Already connected"),
                "Error should mention 'Already connected', got: {message}"
            );
        }
        other => panic!("Expected Error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.handshake(None).await;

    client.send(ClientMessage::ping(42)).await;

    match client.recv().await {
        DaemonMessage::Pong { seq } => {
            assert_eq!(seq, 42, "Pong seq should match ping seq");
        }
        other => panic!("Expected Pong, got {other:?}"),
    }

    server.shutdown().await;
}

// ============================================================================
// Lease Arbitration Tests
// ============================================================================

#[tokio::test]
async fn test_open_conflict_between_clients() {
    let server = TestServer::spawn().await;

    let mut alice = server.connect().await;
    alice.handshake(Some("alice")).await;
    let index = alice.open(DeviceType::Gpio, "GPIO_A").await;
    assert_eq!(index, 0);

    // A second client cannot open the held pin; an unknown pin fails the
    // same way so callers cannot probe which names exist.
    let mut bob = server.connect().await;
    bob.handshake(Some("bob")).await;

    bob.send(ClientMessage::open(DeviceType::Gpio, "GPIO_A")).await;
    bob.expect_error_code("not_available").await;

    bob.send(ClientMessage::open(DeviceType::Gpio, "GPIO_X")).await;
    bob.expect_error_code("not_available").await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_excludes_held_pins() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    client.send(ClientMessage::list(DeviceType::Gpio)).await;
    let before = match client.recv().await {
        DaemonMessage::DeviceList { names, .. } => names,
        other => panic!("Expected DeviceList, got {other:?}"),
    };
    assert!(before.contains(&"GPIO_A".to_string()));

    client.open(DeviceType::Gpio, "GPIO_A").await;

    client.send(ClientMessage::list(DeviceType::Gpio)).await;
    let after = match client.recv().await {
        DaemonMessage::DeviceList { names, .. } => names,
        other => panic!("Expected DeviceList, got {other:?}"),
    };
    assert!(!after.contains(&"GPIO_A".to_string()));
    assert_eq!(after.len(), before.len() - 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_i2c_list_never_shrinks() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    client.open_i2c("I2C-1", 0x48).await;

    // Buses multiplex many slave addresses, so the list stays complete.
    client.send(ClientMessage::list(DeviceType::I2c)).await;
    match client.recv().await {
        DaemonMessage::DeviceList { names, .. } => {
            assert!(names.contains(&"I2C-1".to_string()));
            assert!(names.contains(&"I2C-2".to_string()));
        }
        other => panic!("Expected DeviceList, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Gpio, "GPIO_B").await;

    assert!(client.close(DeviceType::Gpio, index).await);
    assert!(!client.close(DeviceType::Gpio, index).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_i2c_indices_never_reused() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let i0 = client.open_i2c("I2C-1", 0x40).await;
    let i1 = client.open_i2c("I2C-1", 0x41).await;
    let i2 = client.open_i2c("I2C-2", 0x42).await;
    assert_eq!((i0, i1, i2), (0, 1, 2));

    assert!(client.close(DeviceType::I2c, i1).await);

    // The freed index is never handed out again.
    let i3 = client.open_i2c("I2C-1", 0x41).await;
    assert_eq!(i3, 3);

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_releases_leases() {
    let server = TestServer::spawn().await;

    let mut alice = server.connect().await;
    alice.handshake(Some("alice")).await;
    alice.open(DeviceType::Gpio, "GPIO_A").await;

    alice.send(ClientMessage::disconnect()).await;
    match alice.recv().await {
        DaemonMessage::Ack => {}
        other => panic!("Expected Ack, got {other:?}"),
    }
    sleep(SETTLE_PERIOD).await;

    let mut bob = server.connect().await;
    bob.handshake(Some("bob")).await;
    let index = bob.open(DeviceType::Gpio, "GPIO_A").await;
    assert_eq!(index, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_socket_drop_releases_leases() {
    let server = TestServer::spawn().await;

    let mut alice = server.connect().await;
    alice.handshake(Some("alice")).await;
    alice.open(DeviceType::Gpio, "GPIO_A").await;

    // Process death: the socket closes without a disconnect message.
    drop(alice);
    sleep(SETTLE_PERIOD).await;

    let mut bob = server.connect().await;
    bob.handshake(Some("bob")).await;
    let index = bob.open(DeviceType::Gpio, "GPIO_A").await;
    assert_eq!(index, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_same_identity_replaces_session() {
    let server = TestServer::spawn().await;

    let mut first = server.connect().await;
    first.handshake(Some("4242")).await;
    first.open(DeviceType::Gpio, "GPIO_A").await;

    // Same identity connects again without the first socket closing.
    let mut second = server.connect().await;
    second.handshake(Some("4242")).await;
    let index = second.open(DeviceType::Gpio, "GPIO_A").await;
    assert_eq!(index, 0);

    // The stale socket finally closes. Its teardown must not touch the
    // replacement session or its lease.
    drop(first);
    sleep(SETTLE_PERIOD).await;

    second.send(ClientMessage::ping(1)).await;
    match second.recv().await {
        DaemonMessage::Pong { seq } => assert_eq!(seq, 1),
        other => panic!("Expected Pong, got {other:?}"),
    }

    let mut third = server.connect().await;
    third.handshake(Some("bob")).await;
    third.send(ClientMessage::open(DeviceType::Gpio, "GPIO_A")).await;
    third.expect_error_code("not_available").await;

    server.shutdown().await;
}

// ============================================================================
// Control Operation Tests
// ============================================================================

#[tokio::test]
async fn test_gpio_set_get_value() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Gpio, "GPIO_C").await;

    client
        .send(ClientMessage::control(
            DeviceType::Gpio,
            index,
            DeviceRequest::GpioSetDirection {
                direction: GpioDirection::OutLow,
            },
        ))
        .await;
    match client.recv().await {
        DaemonMessage::Result {
            response: DeviceResponse::Ack,
        } => {}
        other => panic!("Expected Ack result, got {other:?}"),
    }

    client
        .send(ClientMessage::control(
            DeviceType::Gpio,
            index,
            DeviceRequest::GpioSetValue { value: true },
        ))
        .await;
    let _ = client.recv().await;

    client
        .send(ClientMessage::control(
            DeviceType::Gpio,
            index,
            DeviceRequest::GpioGetValue,
        ))
        .await;
    match client.recv().await {
        DaemonMessage::Result {
            response: DeviceResponse::Value { value },
        } => assert!(value),
        other => panic!("Expected Value result, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_control_on_closed_slot() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Gpio, "GPIO_D").await;
    client.close(DeviceType::Gpio, index).await;

    client
        .send(ClientMessage::control(
            DeviceType::Gpio,
            index,
            DeviceRequest::GpioGetValue,
        ))
        .await;
    client.expect_error_code("not_open").await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_uart_write_reaches_driver() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Uart, "UART0").await;

    client
        .send(ClientMessage::control(
            DeviceType::Uart,
            index,
            DeviceRequest::UartWrite {
                data: b"hello".to_vec(),
            },
        ))
        .await;
    match client.recv().await {
        DaemonMessage::Result {
            response: DeviceResponse::Written { count },
        } => assert_eq!(count, 5),
        other => panic!("Expected Written result, got {other:?}"),
    }

    assert_eq!(server.driver.written(DeviceType::Uart, index), b"hello");

    server.shutdown().await;
}

// ============================================================================
// Event Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_gpio_event_delivery() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Gpio, "GPIO_A").await;

    client
        .send(ClientMessage::control(
            DeviceType::Gpio,
            index,
            DeviceRequest::GpioSetDirection {
                direction: GpioDirection::In,
            },
        ))
        .await;
    let _ = client.recv().await;

    client
        .send(ClientMessage::register_listener(DeviceType::Gpio, index))
        .await;
    match client.recv().await {
        DaemonMessage::Ack => {}
        other => panic!("Expected Ack, got {other:?}"),
    }

    assert!(server.driver.raise_event(DeviceType::Gpio, index));

    match client.recv().await {
        DaemonMessage::Event { device, index: i } => {
            assert_eq!(device, DeviceType::Gpio);
            assert_eq!(i, index);
        }
        other => panic!("Expected Event, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_listener_requires_input_direction() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Gpio, "GPIO_A").await;

    // No direction configured: the pin cannot source interrupts.
    client
        .send(ClientMessage::register_listener(DeviceType::Gpio, index))
        .await;
    client.expect_error_code("invalid_argument").await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_unregister_stops_event_delivery() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    let index = client.open(DeviceType::Gpio, "GPIO_B").await;
    client
        .send(ClientMessage::control(
            DeviceType::Gpio,
            index,
            DeviceRequest::GpioSetDirection {
                direction: GpioDirection::In,
            },
        ))
        .await;
    let _ = client.recv().await;

    client
        .send(ClientMessage::register_listener(DeviceType::Gpio, index))
        .await;
    let _ = client.recv().await;

    client
        .send(ClientMessage::unregister_listener(DeviceType::Gpio, index))
        .await;
    match client.recv().await {
        DaemonMessage::Ack => {}
        other => panic!("Expected Ack, got {other:?}"),
    }

    // The line is disarmed again, so no event is raised at all.
    assert!(!server.driver.raise_event(DeviceType::Gpio, index));

    // The connection still answers requests normally.
    client.send(ClientMessage::ping(7)).await;
    match client.recv().await {
        DaemonMessage::Pong { seq } => assert_eq!(seq, 7),
        other => panic!("Expected Pong, got {other:?}"),
    }

    server.shutdown().await;
}

// ============================================================================
// Graceful Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_graceful_shutdown_removes_socket() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.handshake(None).await;

    let socket_path = server.socket_path.clone();

    server.cancel_token.cancel();
    sleep(SETTLE_PERIOD).await;

    assert!(
        !socket_path.exists(),
        "Socket file should be removed after shutdown"
    );
}

// ============================================================================
// Concurrent Clients Tests
// ============================================================================

#[tokio::test]
async fn test_multiple_clients_concurrent() {
    let server = TestServer::spawn().await;

    // Each concurrent client leases its own pin.
    let pins = ["GPIO_A", "GPIO_B", "GPIO_C", "GPIO_D", "GPIO_E"];

    let mut handles = Vec::new();
    for (i, pin) in pins.iter().enumerate() {
        let socket_path = server.socket_path.clone();
        let pin = pin.to_string();
        let handle = tokio::spawn(async move {
            let stream = UnixStream::connect(&socket_path).await.unwrap();
            let mut client = TestClient::new(stream);

            let id = client.handshake(Some(&format!("concurrent-{i}"))).await;
            assert_eq!(id, format!("concurrent-{i}"));

            let index = client.open(DeviceType::Gpio, &pin).await;
            assert!(client.close(DeviceType::Gpio, index).await);
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.expect("concurrent client task should succeed");
    }

    server.shutdown().await;
}
