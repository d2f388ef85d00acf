//! Peripheral device types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of peripheral a slot represents.
///
/// GPIO, PWM, SPI and UART slots occupy fixed table positions enumerated
/// once at startup. I2C slots are allocated dynamically with indices that
/// are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Gpio,
    I2c,
    Pwm,
    Spi,
    Uart,
}

impl DeviceType {
    /// All device types, in a stable order.
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Gpio,
        DeviceType::I2c,
        DeviceType::Pwm,
        DeviceType::Spi,
        DeviceType::Uart,
    ];

    /// The fixed-table device types (everything except I2C).
    pub const FIXED: [DeviceType; 4] = [
        DeviceType::Gpio,
        DeviceType::Pwm,
        DeviceType::Spi,
        DeviceType::Uart,
    ];

    /// Returns the lowercase display name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpio => "gpio",
            Self::I2c => "i2c",
            Self::Pwm => "pwm",
            Self::Spi => "spi",
            Self::Uart => "uart",
        }
    }

    /// Returns true if slots of this type live in a fixed table.
    ///
    /// I2C slots are dynamic: created per open with a monotonically
    /// increasing index and removed entirely on close.
    #[must_use]
    pub fn is_fixed_table(&self) -> bool {
        !matches!(self, Self::I2c)
    }

    /// Returns true if slots of this type can source hardware events
    /// (GPIO edge interrupts, UART data-ready).
    #[must_use]
    pub fn has_event_source(&self) -> bool {
        matches!(self, Self::Gpio | Self::Uart)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
