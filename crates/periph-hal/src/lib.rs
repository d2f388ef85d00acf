//! Periph HAL - the native driver seam.
//!
//! The arbitration core never touches hardware directly; it calls a
//! [`PeripheralDriver`] with an opaque [`DriverHandle`]. All driver calls are
//! synchronous and bounded-latency. Hardware interrupts arrive out of band as
//! [`HardwareEvent`]s on a channel the driver implementation feeds.
//!
//! The [`SimDriver`] in this crate is an in-memory implementation used by
//! default and by the test suites; a real board backend implements the same
//! trait over its native library.

pub mod sim;

use periph_core::{
    ActiveType, DeviceType, EdgeTrigger, FlushDirection, GpioDirection, SpiBitJustification,
    UartParity,
};
use thiserror::Error;

pub use sim::{SimDriver, SimProfile};

/// Opaque handle to an open native peripheral.
///
/// Only the driver that issued a handle can interpret it. The arbitration
/// core stores it in the slot table and passes it back for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverHandle(u64);

impl DriverHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// An asynchronous hardware interrupt or data-ready notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareEvent {
    pub device: DeviceType,
    pub index: u32,
}

/// Errors surfaced by a driver implementation.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The named or indexed device does not exist on this board.
    #[error("no such device: {0}")]
    NoSuchDevice(String),

    /// The device is held open elsewhere at the native level.
    #[error("device busy: {0}")]
    Busy(String),

    /// The handle does not refer to an open device.
    #[error("stale driver handle")]
    StaleHandle,

    /// The operation does not apply to this device.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Underlying I/O failure.
    #[error("driver i/o error: {0}")]
    Io(String),
}

/// A single configuration parameter applied to an open device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverConfig {
    GpioDirection(GpioDirection),
    GpioActiveType(ActiveType),
    GpioEdgeTrigger(EdgeTrigger),

    PwmEnabled(bool),
    PwmFrequencyHz(f64),
    PwmDutyCycle(f64),

    UartBaudRate(u32),
    UartDataSize(u8),
    UartParity(UartParity),
    UartStopBits(u8),
    UartHardwareFlowControl(bool),

    SpiMode(u8),
    SpiFrequencyHz(u32),
    SpiBitsPerWord(u8),
    SpiBitJustification(SpiBitJustification),
    SpiCsChange(bool),
    SpiDelayUs(u16),
}

/// The native peripheral driver contract.
///
/// Implementations must be thread-safe; the daemon calls them from multiple
/// tasks. Every method is a synchronous, bounded call. Arguments have already
/// been range-validated by the time they reach the driver.
pub trait PeripheralDriver: Send + Sync + 'static {
    /// Enumerates the board's resource names for a device type, in a stable
    /// order. Called once at startup to build the slot tables.
    fn list_names(&self, device: DeviceType) -> Vec<String>;

    /// Opens a fixed-table device by its slot index.
    fn open(&self, device: DeviceType, index: u32) -> Result<DriverHandle, DriverError>;

    /// Opens an I2C device on the named bus at a slave address. `index` is
    /// the registry-assigned dynamic slot index, passed through for event
    /// attribution.
    fn open_i2c(&self, name: &str, address: u16, index: u32)
        -> Result<DriverHandle, DriverError>;

    /// Closes an open device. Closing a stale handle is a no-op.
    fn close(&self, handle: DriverHandle);

    /// Applies one configuration parameter.
    fn set_config(&self, handle: DriverHandle, config: DriverConfig) -> Result<(), DriverError>;

    /// Reads a GPIO level (active-low inversion applied by the driver).
    fn get_value(&self, handle: DriverHandle) -> Result<bool, DriverError>;

    /// Drives a GPIO level.
    fn set_value(&self, handle: DriverHandle, value: bool) -> Result<(), DriverError>;

    /// Reads up to `length` bytes.
    fn read(&self, handle: DriverHandle, length: usize) -> Result<Vec<u8>, DriverError>;

    /// Writes bytes; returns the count accepted.
    fn write(&self, handle: DriverHandle, data: &[u8]) -> Result<usize, DriverError>;

    /// Full-duplex SPI transfer; returns exactly `data.len()` bytes.
    fn transfer(&self, handle: DriverHandle, data: &[u8]) -> Result<Vec<u8>, DriverError>;

    /// Reads `length` bytes from an I2C register.
    fn read_reg(
        &self,
        handle: DriverHandle,
        reg: u8,
        length: usize,
    ) -> Result<Vec<u8>, DriverError>;

    /// Writes bytes to an I2C register.
    fn write_reg(&self, handle: DriverHandle, reg: u8, data: &[u8]) -> Result<(), DriverError>;

    /// Discards buffered UART data in the given direction.
    fn flush(&self, handle: DriverHandle, direction: FlushDirection) -> Result<(), DriverError>;

    /// Holds the UART transmit line in a break condition.
    fn send_break(&self, handle: DriverHandle, duration_ms: u32) -> Result<(), DriverError>;

    /// Arms the device's interrupt source; subsequent hardware activity
    /// produces [`HardwareEvent`]s.
    fn watch(&self, handle: DriverHandle) -> Result<(), DriverError>;

    /// Disarms the interrupt source. Safe on a stale handle.
    fn unwatch(&self, handle: DriverHandle);
}
