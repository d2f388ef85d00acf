//! Registry actor - owns all slot and session state.
//!
//! The RegistryActor is the single owner of arbitration state: the fixed
//! slot tables, the dynamic I2C slot map, and the per-session lease sets.
//! It receives commands via an mpsc channel and processes them one at a
//! time, so availability checks and opens are atomic by construction.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use periph_core::{DeviceType, DomainError, GpioDirection, SessionId};
use periph_hal::{DriverConfig, DriverError, DriverHandle, PeripheralDriver};
use periph_protocol::{DeviceRequest, DeviceResponse};

use crate::events::{EventListener, EventRouter};
use crate::liveness::{LivenessMonitor, LivenessToken};

use super::commands::{RegistryCommand, RegistryError};

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of concurrent client sessions.
pub const MAX_SESSIONS: usize = 100;

// ============================================================================
// Slot and session state
// ============================================================================

/// One position in a fixed device table.
struct FixedSlot {
    name: String,
    /// Present while the slot is leased.
    handle: Option<DriverHandle>,
    /// Last direction configured on a GPIO slot. Listener registration
    /// requires an input direction.
    gpio_direction: Option<GpioDirection>,
}

/// One dynamically allocated I2C slot.
struct I2cSlot {
    name: String,
    address: u16,
    handle: DriverHandle,
}

/// Per-client session state.
struct Session {
    connected_at: DateTime<Utc>,
    token: LivenessToken,
    /// Incarnation counter for this identity. A `SessionLost` report only
    /// applies if its epoch matches, so a report queued behind a reconnect
    /// cannot tear down the replacement session.
    epoch: u64,
    /// Slot indices this session holds, per device type.
    leases: BTreeMap<DeviceType, BTreeSet<u32>>,
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all arbitration state.
///
/// # Ownership
///
/// The actor owns:
/// - `tables`: fixed slot tables (GPIO/PWM/SPI/UART), built once at startup
///   from the driver's name enumeration
/// - `i2c`: the dynamic I2C slot map, keyed by a monotonically increasing
///   index that is never reused
/// - `sessions`: per-client lease bookkeeping
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Own command sender, handed to liveness callbacks so a dead client's
    /// cleanup re-enters the actor as a `SessionLost` command.
    command_tx: mpsc::Sender<RegistryCommand>,

    driver: Arc<dyn PeripheralDriver>,
    router: Arc<EventRouter>,
    liveness: Arc<LivenessMonitor>,

    /// Fixed slot tables, one per fixed device type.
    tables: HashMap<DeviceType, Vec<FixedSlot>>,

    /// Known I2C bus names (never filtered by occupancy: a bus carries
    /// many slave addresses, so it is never exclusively held by name).
    i2c_names: Vec<String>,

    /// Open I2C slots by dynamic index.
    i2c: BTreeMap<u32, I2cSlot>,

    /// Next I2C index. Advances once allocation begins, even if the
    /// driver open then fails, and never goes backwards.
    next_i2c: u32,

    /// Active sessions by id.
    sessions: HashMap<SessionId, Session>,

    /// Next session epoch, shared across all identities.
    next_epoch: u64,
}

impl RegistryActor {
    /// Creates a new registry actor, enumerating the fixed slot tables
    /// from the driver.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        command_tx: mpsc::Sender<RegistryCommand>,
        driver: Arc<dyn PeripheralDriver>,
        router: Arc<EventRouter>,
        liveness: Arc<LivenessMonitor>,
    ) -> Self {
        let mut tables = HashMap::new();
        for device in DeviceType::FIXED {
            let slots: Vec<FixedSlot> = driver
                .list_names(device)
                .into_iter()
                .map(|name| FixedSlot {
                    name,
                    handle: None,
                    gpio_direction: None,
                })
                .collect();
            debug!(device = %device, slots = slots.len(), "Slot table built");
            tables.insert(device, slots);
        }
        let i2c_names = driver.list_names(DeviceType::I2c);

        Self {
            receiver,
            command_tx,
            driver,
            router,
            liveness,
            tables,
            i2c_names,
            i2c: BTreeMap::new(),
            next_i2c: 0,
            sessions: HashMap::new(),
            next_epoch: 0,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(
            sessions = self.sessions.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Connect {
                identity,
                respond_to,
            } => {
                let result = self.handle_connect(identity).await;
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Disconnect {
                session_id,
                respond_to,
            } => {
                let result = self.handle_disconnect(session_id, "disconnect").await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::SessionLost { session_id, epoch } => {
                let current = self.sessions.get(&session_id).map(|s| s.epoch);
                if current != Some(epoch) {
                    debug!(
                        session_id = %session_id,
                        epoch,
                        "Stale session-lost report ignored"
                    );
                } else if self
                    .handle_disconnect(session_id.clone(), "connection lost")
                    .await
                {
                    warn!(session_id = %session_id, "Leases reclaimed from lost client");
                }
            }
            RegistryCommand::ListFree { device, respond_to } => {
                let _ = respond_to.send(self.handle_list_free(device));
            }
            RegistryCommand::Open {
                session_id,
                device,
                name,
                address,
                respond_to,
            } => {
                let result = self.handle_open(session_id, device, name, address);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Close {
                device,
                index,
                respond_to,
            } => {
                let result = self.handle_close(device, index).await;
                let _ = respond_to.send(Ok(result));
            }
            RegistryCommand::Control {
                device,
                index,
                request,
                respond_to,
            } => {
                let result = self.handle_control(device, index, request);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RegisterListener {
                session_id,
                device,
                index,
                listener,
                respond_to,
            } => {
                let result = self
                    .handle_register_listener(session_id, device, index, listener)
                    .await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::UnregisterListener {
                session_id,
                device,
                index,
                respond_to,
            } => {
                let result = self
                    .handle_unregister_listener(session_id, device, index)
                    .await;
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Handles client admission.
    ///
    /// One session exists per identity: a reconnect with the same identity
    /// replaces the previous session and releases everything it held first.
    async fn handle_connect(
        &mut self,
        identity: String,
    ) -> Result<(SessionId, LivenessToken), RegistryError> {
        let session_id = SessionId::from_identity(identity.clone());

        if let Some(previous) = self.sessions.remove(&session_id) {
            info!(
                session_id = %session_id,
                "Identity reconnected, replacing previous session"
            );
            self.liveness.unsubscribe(&previous.token);
            // Registrations first so no event lands on a closing slot.
            for (device, indices) in &previous.leases {
                for index in indices {
                    self.router.clear(*device, *index).await;
                }
            }
            self.release_leases(&session_id, previous.leases);
        }

        if self.sessions.len() >= MAX_SESSIONS {
            warn!(
                identity = %identity,
                current = self.sessions.len(),
                max = MAX_SESSIONS,
                "Registry is full, rejecting connection"
            );
            return Err(RegistryError::RegistryFull { max: MAX_SESSIONS });
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        // When the connection dies, re-enter the actor as SessionLost.
        // This is the only reclamation path for a crashed client, so a
        // momentarily full command channel may delay the report but must
        // never drop it.
        let command_tx = self.command_tx.clone();
        let lost_id = session_id.clone();
        let token = self.liveness.subscribe(identity, move || {
            let report = RegistryCommand::SessionLost {
                session_id: lost_id,
                epoch,
            };
            match command_tx.try_send(report) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(report)) => {
                    tokio::spawn(async move {
                        if command_tx.send(report).await.is_err() {
                            warn!("Registry gone, session-lost report dropped");
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Registry gone, session-lost report dropped");
                }
            }
        });

        self.sessions.insert(
            session_id.clone(),
            Session {
                connected_at: Utc::now(),
                token: token.clone(),
                epoch,
                leases: BTreeMap::new(),
            },
        );

        info!(
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session connected"
        );
        Ok((session_id, token))
    }

    /// Ends a session and releases all of its leases.
    ///
    /// Returns false if the session was already gone (double disconnect,
    /// or a lost-connection report racing a graceful disconnect).
    async fn handle_disconnect(&mut self, session_id: SessionId, reason: &str) -> bool {
        let Some(session) = self.sessions.remove(&session_id) else {
            debug!(session_id = %session_id, "Disconnect for unknown session");
            return false;
        };

        self.liveness.unsubscribe(&session.token);

        let lease_count: usize = session.leases.values().map(BTreeSet::len).sum();
        info!(
            session_id = %session_id,
            reason = reason,
            leases = lease_count,
            connected_at = %session.connected_at,
            remaining_sessions = self.sessions.len(),
            "Session ended"
        );

        // Registrations first so no event lands on a closing slot.
        for (device, indices) in &session.leases {
            for index in indices {
                self.router.clear(*device, *index).await;
            }
        }
        self.release_leases(&session_id, session.leases);
        true
    }

    /// Closes every slot in a lease set at the driver level.
    fn release_leases(
        &mut self,
        session_id: &SessionId,
        leases: BTreeMap<DeviceType, BTreeSet<u32>>,
    ) {
        for (device, indices) in leases {
            for index in indices {
                if self.close_slot_inner(device, index) {
                    debug!(
                        session_id = %session_id,
                        device = %device,
                        index,
                        "Lease released"
                    );
                }
            }
        }
    }

    // ========================================================================
    // Listing and opening
    // ========================================================================

    /// Lists resources of a device type available for opening.
    ///
    /// Fixed tables report names of unleased slots. I2C reports every bus:
    /// buses are shared by address, never held exclusively by name.
    fn handle_list_free(&self, device: DeviceType) -> Vec<String> {
        if device == DeviceType::I2c {
            return self.i2c_names.clone();
        }
        self.tables
            .get(&device)
            .map(|table| {
                table
                    .iter()
                    .filter(|slot| slot.handle.is_none())
                    .map(|slot| slot.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Opens a named resource for a session.
    fn handle_open(
        &mut self,
        session_id: SessionId,
        device: DeviceType,
        name: String,
        address: Option<u16>,
    ) -> Result<u32, RegistryError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(RegistryError::UnknownSession(session_id));
        }

        let index = if device == DeviceType::I2c {
            self.open_i2c(&name, address)?
        } else {
            self.open_fixed(device, &name)?
        };

        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.leases.entry(device).or_default().insert(index);
        }

        info!(
            session_id = %session_id,
            device = %device,
            name = %name,
            index,
            "Resource opened"
        );
        Ok(index)
    }

    /// Opens a fixed-table slot by name.
    fn open_fixed(&mut self, device: DeviceType, name: &str) -> Result<u32, RegistryError> {
        let not_available = || RegistryError::NotAvailable {
            device,
            name: name.to_string(),
        };

        let Some(table) = self.tables.get_mut(&device) else {
            return Err(not_available());
        };
        let Some(index) = table.iter().position(|slot| slot.name == name) else {
            return Err(not_available());
        };
        let Some(slot) = table.get_mut(index) else {
            return Err(not_available());
        };
        // Unknown name and name-already-held report the same error: a
        // caller learns only that the resource cannot be had.
        if slot.handle.is_some() {
            return Err(not_available());
        }

        let handle = self
            .driver
            .open(device, index as u32)
            .map_err(|e| match e {
                DriverError::NoSuchDevice(_) | DriverError::Busy(_) => not_available(),
                other => RegistryError::Driver(other.to_string()),
            })?;

        slot.handle = Some(handle);
        slot.gpio_direction = None;
        Ok(index as u32)
    }

    /// Opens an I2C device on a named bus at a slave address.
    ///
    /// The index counter advances once arguments are validated, even when
    /// the driver open then fails, so indices observed by clients never
    /// repeat.
    fn open_i2c(&mut self, name: &str, address: Option<u16>) -> Result<u32, RegistryError> {
        if !self.i2c_names.iter().any(|n| n == name) {
            return Err(RegistryError::NotAvailable {
                device: DeviceType::I2c,
                name: name.to_string(),
            });
        }
        let Some(address) = address else {
            return Err(DomainError::invalid("address", "none", "required for i2c").into());
        };

        let index = self.next_i2c;
        self.next_i2c += 1;

        let handle = self
            .driver
            .open_i2c(name, address, index)
            .map_err(|e| match e {
                DriverError::NoSuchDevice(_) => RegistryError::NotAvailable {
                    device: DeviceType::I2c,
                    name: name.to_string(),
                },
                other => RegistryError::Driver(other.to_string()),
            })?;

        self.i2c.insert(
            index,
            I2cSlot {
                name: name.to_string(),
                address,
                handle,
            },
        );
        Ok(index)
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Closes a slot. Returns false if it was already closed; closing is
    /// idempotent and carries no ownership check.
    async fn handle_close(&mut self, device: DeviceType, index: u32) -> bool {
        self.router.clear(device, index).await;

        let closed = self.close_slot_inner(device, index);
        if closed {
            // Drop the lease from whichever session holds it.
            for session in self.sessions.values_mut() {
                if let Some(indices) = session.leases.get_mut(&device) {
                    indices.remove(&index);
                }
            }
            info!(device = %device, index, "Slot closed");
        } else {
            debug!(device = %device, index, "Close on already-closed slot");
        }
        closed
    }

    /// Driver-level close. Returns true if the slot was open.
    fn close_slot_inner(&mut self, device: DeviceType, index: u32) -> bool {
        if device == DeviceType::I2c {
            match self.i2c.remove(&index) {
                Some(slot) => {
                    self.driver.close(slot.handle);
                    debug!(bus = %slot.name, address = slot.address, index, "I2C slot closed");
                    true
                }
                None => false,
            }
        } else {
            let Some(slot) = self
                .tables
                .get_mut(&device)
                .and_then(|table| table.get_mut(index as usize))
            else {
                return false;
            };
            match slot.handle.take() {
                Some(handle) => {
                    self.driver.unwatch(handle);
                    self.driver.close(handle);
                    slot.gpio_direction = None;
                    true
                }
                None => false,
            }
        }
    }

    // ========================================================================
    // Control operations
    // ========================================================================

    /// Executes a control or data operation on an open slot.
    fn handle_control(
        &mut self,
        device: DeviceType,
        index: u32,
        request: DeviceRequest,
    ) -> Result<DeviceResponse, RegistryError> {
        if request.device() != device {
            return Err(DomainError::WrongDevice {
                op: request.op_name(),
                device: device.to_string(),
            }
            .into());
        }
        request.validate()?;

        let handle = self.open_handle(device, index)?;
        let response = self.apply_control(handle, &request).map_err(|e| match e {
            DriverError::StaleHandle => RegistryError::NotOpen { device, index },
            other => RegistryError::Driver(other.to_string()),
        })?;

        // Remember the configured GPIO direction; listener registration
        // needs it.
        if let DeviceRequest::GpioSetDirection { direction } = &request {
            if let Some(slot) = self
                .tables
                .get_mut(&device)
                .and_then(|table| table.get_mut(index as usize))
            {
                slot.gpio_direction = Some(*direction);
            }
        }

        debug!(device = %device, index, op = request.op_name(), "Control applied");
        Ok(response)
    }

    /// Resolves the driver handle of an open slot.
    fn open_handle(&self, device: DeviceType, index: u32) -> Result<DriverHandle, RegistryError> {
        let handle = if device == DeviceType::I2c {
            self.i2c.get(&index).map(|slot| slot.handle)
        } else {
            self.tables
                .get(&device)
                .and_then(|table| table.get(index as usize))
                .and_then(|slot| slot.handle)
        };
        handle.ok_or(RegistryError::NotOpen { device, index })
    }

    /// Maps one validated request onto driver calls.
    fn apply_control(
        &self,
        handle: DriverHandle,
        request: &DeviceRequest,
    ) -> Result<DeviceResponse, DriverError> {
        use DeviceRequest as R;
        use DeviceResponse as Resp;

        let response = match request {
            // GPIO
            R::GpioSetDirection { direction } => {
                self.driver
                    .set_config(handle, DriverConfig::GpioDirection(*direction))?;
                Resp::Ack
            }
            R::GpioSetValue { value } => {
                self.driver.set_value(handle, *value)?;
                Resp::Ack
            }
            R::GpioGetValue => Resp::Value {
                value: self.driver.get_value(handle)?,
            },
            R::GpioSetActiveType { active } => {
                self.driver
                    .set_config(handle, DriverConfig::GpioActiveType(*active))?;
                Resp::Ack
            }
            R::GpioSetEdgeTrigger { edge } => {
                self.driver
                    .set_config(handle, DriverConfig::GpioEdgeTrigger(*edge))?;
                Resp::Ack
            }

            // PWM
            R::PwmSetEnabled { enabled } => {
                self.driver
                    .set_config(handle, DriverConfig::PwmEnabled(*enabled))?;
                Resp::Ack
            }
            R::PwmSetFrequencyHz { frequency_hz } => {
                self.driver
                    .set_config(handle, DriverConfig::PwmFrequencyHz(*frequency_hz))?;
                Resp::Ack
            }
            R::PwmSetDutyCycle { duty_cycle } => {
                self.driver
                    .set_config(handle, DriverConfig::PwmDutyCycle(*duty_cycle))?;
                Resp::Ack
            }

            // I2C
            R::I2cRead { length } => Resp::Bytes {
                data: self.driver.read(handle, *length as usize)?,
            },
            R::I2cWrite { data } => Resp::Written {
                count: self.driver.write(handle, data)? as u32,
            },
            R::I2cReadRegByte { reg } => {
                let data = self.driver.read_reg(handle, *reg, 1)?;
                Resp::Byte {
                    value: data.first().copied().unwrap_or(0),
                }
            }
            R::I2cReadRegWord { reg } => {
                let data = self.driver.read_reg(handle, *reg, 2)?;
                let lo = data.first().copied().unwrap_or(0);
                let hi = data.get(1).copied().unwrap_or(0);
                Resp::Word {
                    value: u16::from_le_bytes([lo, hi]),
                }
            }
            R::I2cReadRegBuffer { reg, length } => Resp::Bytes {
                data: self.driver.read_reg(handle, *reg, *length as usize)?,
            },
            R::I2cWriteRegByte { reg, data } => {
                self.driver.write_reg(handle, *reg, &[*data])?;
                Resp::Ack
            }
            R::I2cWriteRegWord { reg, data } => {
                self.driver.write_reg(handle, *reg, &data.to_le_bytes())?;
                Resp::Ack
            }
            R::I2cWriteRegBuffer { reg, data } => {
                self.driver.write_reg(handle, *reg, data)?;
                Resp::Ack
            }

            // UART
            R::UartSetBaudRate { rate } => {
                self.driver
                    .set_config(handle, DriverConfig::UartBaudRate(*rate))?;
                Resp::Ack
            }
            R::UartSetDataSize { bits } => {
                self.driver
                    .set_config(handle, DriverConfig::UartDataSize(*bits))?;
                Resp::Ack
            }
            R::UartSetParity { parity } => {
                self.driver
                    .set_config(handle, DriverConfig::UartParity(*parity))?;
                Resp::Ack
            }
            R::UartSetStopBits { bits } => {
                self.driver
                    .set_config(handle, DriverConfig::UartStopBits(*bits))?;
                Resp::Ack
            }
            R::UartSetHardwareFlowControl { enabled } => {
                self.driver
                    .set_config(handle, DriverConfig::UartHardwareFlowControl(*enabled))?;
                Resp::Ack
            }
            R::UartFlush { direction } => {
                self.driver.flush(handle, *direction)?;
                Resp::Ack
            }
            R::UartSendBreak { duration_ms } => {
                self.driver.send_break(handle, *duration_ms)?;
                Resp::Ack
            }
            R::UartRead { length } => Resp::Bytes {
                data: self.driver.read(handle, *length as usize)?,
            },
            R::UartWrite { data } => Resp::Written {
                count: self.driver.write(handle, data)? as u32,
            },

            // SPI
            R::SpiSetMode { mode } => {
                self.driver
                    .set_config(handle, DriverConfig::SpiMode(*mode))?;
                Resp::Ack
            }
            R::SpiSetFrequencyHz { frequency_hz } => {
                self.driver
                    .set_config(handle, DriverConfig::SpiFrequencyHz(*frequency_hz))?;
                Resp::Ack
            }
            R::SpiSetBitsPerWord { bits } => {
                self.driver
                    .set_config(handle, DriverConfig::SpiBitsPerWord(*bits))?;
                Resp::Ack
            }
            R::SpiSetBitJustification { justification } => {
                self.driver
                    .set_config(handle, DriverConfig::SpiBitJustification(*justification))?;
                Resp::Ack
            }
            R::SpiSetCsChange { change } => {
                self.driver
                    .set_config(handle, DriverConfig::SpiCsChange(*change))?;
                Resp::Ack
            }
            R::SpiSetDelayUs { delay_us } => {
                self.driver
                    .set_config(handle, DriverConfig::SpiDelayUs(*delay_us))?;
                Resp::Ack
            }
            R::SpiTransfer { data } => Resp::Bytes {
                data: self.driver.transfer(handle, data)?,
            },
            R::SpiRead { length } => Resp::Bytes {
                data: self.driver.read(handle, *length as usize)?,
            },
            R::SpiWrite { data } => Resp::Written {
                count: self.driver.write(handle, data)? as u32,
            },
        };
        Ok(response)
    }

    // ========================================================================
    // Listener registration
    // ========================================================================

    /// Registers a listener on a slot, replacing any previous one.
    async fn handle_register_listener(
        &mut self,
        session_id: SessionId,
        device: DeviceType,
        index: u32,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), RegistryError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(RegistryError::UnknownSession(session_id));
        }
        if !device.has_event_source() {
            return Err(DomainError::invalid("device", device, "gpio or uart").into());
        }

        let handle = self.open_handle(device, index)?;

        if device == DeviceType::Gpio {
            let direction = self
                .tables
                .get(&device)
                .and_then(|table| table.get(index as usize))
                .and_then(|slot| slot.gpio_direction);
            match direction {
                Some(d) if d.is_input() => {}
                _ => {
                    return Err(
                        DomainError::invalid("direction", "not input", "input direction").into(),
                    );
                }
            }
        }

        self.driver.watch(handle).map_err(|e| match e {
            DriverError::StaleHandle => RegistryError::NotOpen { device, index },
            other => RegistryError::Driver(other.to_string()),
        })?;

        self.router
            .register(device, index, session_id.clone(), listener)
            .await;

        info!(
            session_id = %session_id,
            device = %device,
            index,
            "Listener registered"
        );
        Ok(())
    }

    /// Removes a session's listener registration from a slot.
    ///
    /// Removing a registration that doesn't exist, or that belongs to a
    /// different session, is a quiet no-op.
    async fn handle_unregister_listener(
        &mut self,
        session_id: SessionId,
        device: DeviceType,
        index: u32,
    ) -> Result<(), RegistryError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(RegistryError::UnknownSession(session_id));
        }

        let removed = self.router.unregister(device, index, &session_id).await;
        if removed {
            if let Ok(handle) = self.open_handle(device, index) {
                self.driver.unwatch(handle);
            }
            debug!(
                session_id = %session_id,
                device = %device,
                index,
                "Listener unregistered"
            );
        }
        Ok(())
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of active sessions.
    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns how many slots a session currently leases.
    #[cfg(test)]
    fn lease_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .get(session_id)
            .map(|s| s.leases.values().map(BTreeSet::len).sum())
            .unwrap_or(0)
    }
}
