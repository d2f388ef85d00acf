//! Control-argument value types for per-device configuration calls.
//!
//! These are plain enums shared by the wire protocol and the driver seam.
//! Range validation of numeric arguments (frequency, duty cycle, lengths)
//! happens at the protocol layer before anything reaches a driver.

use serde::{Deserialize, Serialize};

/// GPIO line direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioDirection {
    /// Input: the line can be read and can source edge interrupts.
    In,
    /// Output, driven high initially.
    OutHigh,
    /// Output, driven low initially.
    OutLow,
}

impl GpioDirection {
    /// Returns true if the line is configured as an input.
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(self, Self::In)
    }
}

/// GPIO active level. Active-low lines invert the logical value on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveType {
    High,
    Low,
}

/// GPIO edge trigger selection for interrupt generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTrigger {
    None,
    Rising,
    Falling,
    Both,
}

/// UART parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UartParity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

/// UART flush direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushDirection {
    Receive,
    Transmit,
    Both,
}

/// SPI bit justification (shift order on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiBitJustification {
    MsbFirst,
    LsbFirst,
}
