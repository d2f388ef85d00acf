//! In-memory simulated peripheral driver.
//!
//! `SimDriver` implements [`PeripheralDriver`] against plain data structures:
//! GPIO levels are booleans, UART/I2C/SPI traffic moves through byte buffers,
//! and tests inject interrupts with [`SimDriver::raise_event`]. It is the
//! default backend so the daemon runs on any machine.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use periph_core::{ActiveType, DeviceType, FlushDirection, GpioDirection};

use crate::{DriverConfig, DriverError, DriverHandle, HardwareEvent, PeripheralDriver};

/// The set of resource names the simulator exposes per device type.
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub gpio: Vec<String>,
    pub pwm: Vec<String>,
    pub spi: Vec<String>,
    pub uart: Vec<String>,
    pub i2c: Vec<String>,
}

impl SimProfile {
    fn names(&self, device: DeviceType) -> &[String] {
        match device {
            DeviceType::Gpio => &self.gpio,
            DeviceType::Pwm => &self.pwm,
            DeviceType::Spi => &self.spi,
            DeviceType::Uart => &self.uart,
            DeviceType::I2c => &self.i2c,
        }
    }
}

impl Default for SimProfile {
    fn default() -> Self {
        let names = |prefix: &str, count: usize| {
            (0..count).map(|i| format!("{prefix}{i}")).collect()
        };
        Self {
            gpio: vec![
                "GPIO_A".to_string(),
                "GPIO_B".to_string(),
                "GPIO_C".to_string(),
                "GPIO_D".to_string(),
                "GPIO_E".to_string(),
                "GPIO_F".to_string(),
            ],
            pwm: names("PWM", 2),
            spi: vec!["SPI0.0".to_string(), "SPI0.1".to_string()],
            uart: names("UART", 2),
            i2c: vec!["I2C-1".to_string(), "I2C-2".to_string()],
        }
    }
}

/// State held for one open simulated device.
struct OpenSlot {
    device: DeviceType,
    index: u32,
    direction: Option<GpioDirection>,
    active_low: bool,
    level: bool,
    watched: bool,
    /// Bytes available to `read` (fed by tests via `push_rx`).
    rx: VecDeque<u8>,
    /// Everything written, for test inspection.
    tx: Vec<u8>,
    /// I2C register file.
    registers: HashMap<u8, Vec<u8>>,
}

impl OpenSlot {
    fn new(device: DeviceType, index: u32) -> Self {
        Self {
            device,
            index,
            direction: None,
            active_low: false,
            level: false,
            watched: false,
            rx: VecDeque::new(),
            tx: Vec::new(),
            registers: HashMap::new(),
        }
    }
}

struct SimState {
    profile: SimProfile,
    next_handle: u64,
    open: HashMap<u64, OpenSlot>,
}

impl SimState {
    fn find_open(&self, device: DeviceType, index: u32) -> Option<u64> {
        self.open
            .iter()
            .find(|(_, slot)| slot.device == device && slot.index == index)
            .map(|(raw, _)| *raw)
    }
}

/// In-memory peripheral driver.
pub struct SimDriver {
    state: Mutex<SimState>,
    events: mpsc::UnboundedSender<HardwareEvent>,
}

impl SimDriver {
    /// Creates a simulator with the given profile. Returns the driver and
    /// the hardware event receiver to feed into the event pump.
    pub fn new(profile: SimProfile) -> (Self, mpsc::UnboundedReceiver<HardwareEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Self {
            state: Mutex::new(SimState {
                profile,
                next_handle: 1,
                open: HashMap::new(),
            }),
            events: tx,
        };
        (driver, rx)
    }

    /// Creates a simulator with the default board profile.
    pub fn with_defaults() -> (Self, mpsc::UnboundedReceiver<HardwareEvent>) {
        Self::new(SimProfile::default())
    }

    /// Simulates a hardware interrupt on a slot.
    ///
    /// Returns true if the slot is open and watched, so an event was
    /// emitted; false otherwise (the real interrupt controller is silent for
    /// disarmed lines too).
    pub fn raise_event(&self, device: DeviceType, index: u32) -> bool {
        let armed = {
            let state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            state
                .find_open(device, index)
                .and_then(|raw| state.open.get(&raw))
                .map(|slot| slot.watched)
                .unwrap_or(false)
        };
        if armed {
            let _ = self.events.send(HardwareEvent { device, index });
        }
        armed
    }

    /// Feeds bytes into a slot's receive buffer (UART/I2C/SPI reads).
    pub fn push_rx(&self, device: DeviceType, index: u32, data: &[u8]) {
        let mut state = self.lock_state();
        if let Some(raw) = state.find_open(device, index) {
            if let Some(slot) = state.open.get_mut(&raw) {
                slot.rx.extend(data.iter().copied());
            }
        }
    }

    /// Returns everything written to a slot so far.
    pub fn written(&self, device: DeviceType, index: u32) -> Vec<u8> {
        let state = self.lock_state();
        state
            .find_open(device, index)
            .and_then(|raw| state.open.get(&raw))
            .map(|slot| slot.tx.clone())
            .unwrap_or_default()
    }

    /// Returns the number of currently open simulated devices.
    pub fn open_count(&self) -> usize {
        self.lock_state().open.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_slot<T>(
        &self,
        handle: DriverHandle,
        f: impl FnOnce(&mut OpenSlot) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut state = self.lock_state();
        let slot = state
            .open
            .get_mut(&handle.raw())
            .ok_or(DriverError::StaleHandle)?;
        f(slot)
    }
}

impl PeripheralDriver for SimDriver {
    fn list_names(&self, device: DeviceType) -> Vec<String> {
        self.lock_state().profile.names(device).to_vec()
    }

    fn open(&self, device: DeviceType, index: u32) -> Result<DriverHandle, DriverError> {
        let mut state = self.lock_state();
        let names = state.profile.names(device);
        let name = names
            .get(index as usize)
            .ok_or_else(|| DriverError::NoSuchDevice(format!("{device} index {index}")))?
            .clone();
        if state.find_open(device, index).is_some() {
            return Err(DriverError::Busy(name));
        }
        let raw = state.next_handle;
        state.next_handle += 1;
        state.open.insert(raw, OpenSlot::new(device, index));
        debug!(device = %device, index, name = %name, "sim open");
        Ok(DriverHandle::new(raw))
    }

    fn open_i2c(
        &self,
        name: &str,
        address: u16,
        index: u32,
    ) -> Result<DriverHandle, DriverError> {
        let mut state = self.lock_state();
        if !state.profile.i2c.iter().any(|n| n == name) {
            return Err(DriverError::NoSuchDevice(name.to_string()));
        }
        let raw = state.next_handle;
        state.next_handle += 1;
        state.open.insert(raw, OpenSlot::new(DeviceType::I2c, index));
        debug!(bus = %name, address, index, "sim i2c open");
        Ok(DriverHandle::new(raw))
    }

    fn close(&self, handle: DriverHandle) {
        let mut state = self.lock_state();
        if state.open.remove(&handle.raw()).is_some() {
            debug!(handle = handle.raw(), "sim close");
        }
    }

    fn set_config(&self, handle: DriverHandle, config: DriverConfig) -> Result<(), DriverError> {
        self.with_slot(handle, |slot| {
            match config {
                DriverConfig::GpioDirection(direction) => slot.direction = Some(direction),
                DriverConfig::GpioActiveType(active) => {
                    slot.active_low = active == ActiveType::Low;
                }
                // The simulator accepts and forgets the rest; real drivers
                // program hardware registers here.
                _ => {}
            }
            Ok(())
        })
    }

    fn get_value(&self, handle: DriverHandle) -> Result<bool, DriverError> {
        self.with_slot(handle, |slot| Ok(slot.level ^ slot.active_low))
    }

    fn set_value(&self, handle: DriverHandle, value: bool) -> Result<(), DriverError> {
        self.with_slot(handle, |slot| {
            slot.level = value;
            Ok(())
        })
    }

    fn read(&self, handle: DriverHandle, length: usize) -> Result<Vec<u8>, DriverError> {
        self.with_slot(handle, |slot| {
            let take = length.min(slot.rx.len());
            let mut data: Vec<u8> = slot.rx.drain(..take).collect();
            // Bus reads always return the requested length; serial reads
            // return what has arrived.
            if slot.device != DeviceType::Uart {
                data.resize(length, 0);
            }
            Ok(data)
        })
    }

    fn write(&self, handle: DriverHandle, data: &[u8]) -> Result<usize, DriverError> {
        self.with_slot(handle, |slot| {
            slot.tx.extend_from_slice(data);
            Ok(data.len())
        })
    }

    fn transfer(&self, handle: DriverHandle, data: &[u8]) -> Result<Vec<u8>, DriverError> {
        self.with_slot(handle, |slot| {
            slot.tx.extend_from_slice(data);
            let take = data.len().min(slot.rx.len());
            let mut out: Vec<u8> = slot.rx.drain(..take).collect();
            out.resize(data.len(), 0);
            Ok(out)
        })
    }

    fn read_reg(
        &self,
        handle: DriverHandle,
        reg: u8,
        length: usize,
    ) -> Result<Vec<u8>, DriverError> {
        self.with_slot(handle, |slot| {
            let mut data = slot.registers.get(&reg).cloned().unwrap_or_default();
            data.resize(length, 0);
            Ok(data)
        })
    }

    fn write_reg(&self, handle: DriverHandle, reg: u8, data: &[u8]) -> Result<(), DriverError> {
        self.with_slot(handle, |slot| {
            slot.registers.insert(reg, data.to_vec());
            Ok(())
        })
    }

    fn flush(&self, handle: DriverHandle, direction: FlushDirection) -> Result<(), DriverError> {
        self.with_slot(handle, |slot| {
            match direction {
                FlushDirection::Receive => slot.rx.clear(),
                FlushDirection::Transmit => slot.tx.clear(),
                FlushDirection::Both => {
                    slot.rx.clear();
                    slot.tx.clear();
                }
            }
            Ok(())
        })
    }

    fn send_break(&self, handle: DriverHandle, _duration_ms: u32) -> Result<(), DriverError> {
        self.with_slot(handle, |_slot| Ok(()))
    }

    fn watch(&self, handle: DriverHandle) -> Result<(), DriverError> {
        self.with_slot(handle, |slot| {
            // A GPIO line only has an interrupt source when configured as
            // an input.
            if slot.device == DeviceType::Gpio
                && !slot.direction.is_some_and(|d| d.is_input())
            {
                return Err(DriverError::Unsupported("watch on non-input gpio"));
            }
            slot.watched = true;
            Ok(())
        })
    }

    fn unwatch(&self, handle: DriverHandle) {
        let _ = self.with_slot(handle, |slot| {
            slot.watched = false;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_gpio(driver: &SimDriver, index: u32) -> DriverHandle {
        driver.open(DeviceType::Gpio, index).unwrap()
    }

    #[test]
    fn test_open_unknown_index_fails() {
        let (driver, _rx) = SimDriver::with_defaults();
        let result = driver.open(DeviceType::Gpio, 99);
        assert!(matches!(result, Err(DriverError::NoSuchDevice(_))));
    }

    #[test]
    fn test_double_open_is_busy() {
        let (driver, _rx) = SimDriver::with_defaults();
        let _h = open_gpio(&driver, 0);
        assert!(matches!(
            driver.open(DeviceType::Gpio, 0),
            Err(DriverError::Busy(_))
        ));
    }

    #[test]
    fn test_close_then_reopen() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = open_gpio(&driver, 0);
        driver.close(h);
        assert!(driver.open(DeviceType::Gpio, 0).is_ok());
    }

    #[test]
    fn test_stale_handle() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = open_gpio(&driver, 0);
        driver.close(h);
        assert!(matches!(driver.get_value(h), Err(DriverError::StaleHandle)));
    }

    #[test]
    fn test_active_low_inverts_reads() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = open_gpio(&driver, 1);
        driver.set_value(h, true).unwrap();
        assert!(driver.get_value(h).unwrap());

        driver
            .set_config(h, DriverConfig::GpioActiveType(ActiveType::Low))
            .unwrap();
        assert!(!driver.get_value(h).unwrap());
    }

    #[test]
    fn test_uart_read_returns_available() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = driver.open(DeviceType::Uart, 0).unwrap();
        driver.push_rx(DeviceType::Uart, 0, b"hello");
        let data = driver.read(h, 16).unwrap();
        assert_eq!(data, b"hello");
        // Buffer drained.
        assert!(driver.read(h, 16).unwrap().is_empty());
    }

    #[test]
    fn test_spi_transfer_echoes_length() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = driver.open(DeviceType::Spi, 0).unwrap();
        driver.push_rx(DeviceType::Spi, 0, &[0xAA, 0xBB]);
        let out = driver.transfer(h, &[1, 2, 3, 4]).unwrap();
        assert_eq!(out, vec![0xAA, 0xBB, 0, 0]);
        assert_eq!(driver.written(DeviceType::Spi, 0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_i2c_register_file() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = driver.open_i2c("I2C-1", 0x48, 0).unwrap();
        driver.write_reg(h, 0x10, &[7, 8]).unwrap();
        assert_eq!(driver.read_reg(h, 0x10, 2).unwrap(), vec![7, 8]);
        // Unwritten registers read back as zeros.
        assert_eq!(driver.read_reg(h, 0x20, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_i2c_unknown_bus() {
        let (driver, _rx) = SimDriver::with_defaults();
        assert!(matches!(
            driver.open_i2c("I2C-9", 0x48, 0),
            Err(DriverError::NoSuchDevice(_))
        ));
    }

    #[test]
    fn test_watch_requires_input_direction() {
        let (driver, _rx) = SimDriver::with_defaults();
        let h = open_gpio(&driver, 0);

        assert!(matches!(
            driver.watch(h),
            Err(DriverError::Unsupported(_))
        ));

        driver
            .set_config(h, DriverConfig::GpioDirection(GpioDirection::OutLow))
            .unwrap();
        assert!(matches!(
            driver.watch(h),
            Err(DriverError::Unsupported(_))
        ));

        driver
            .set_config(h, DriverConfig::GpioDirection(GpioDirection::In))
            .unwrap();
        assert!(driver.watch(h).is_ok());
    }

    #[tokio::test]
    async fn test_raise_event_requires_watch() {
        let (driver, mut rx) = SimDriver::with_defaults();
        let h = open_gpio(&driver, 2);
        driver
            .set_config(h, DriverConfig::GpioDirection(GpioDirection::In))
            .unwrap();

        // Not watched yet: no event.
        assert!(!driver.raise_event(DeviceType::Gpio, 2));

        driver.watch(h).unwrap();
        assert!(driver.raise_event(DeviceType::Gpio, 2));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            HardwareEvent {
                device: DeviceType::Gpio,
                index: 2
            }
        );

        driver.unwatch(h);
        assert!(!driver.raise_event(DeviceType::Gpio, 2));
    }
}
