//! Per-device control operations and their validation.
//!
//! A `DeviceRequest` is the payload of a `control` wire message. Argument
//! range violations are local validation failures reported synchronously to
//! the caller; they never reach the native driver layer.

use periph_core::{
    ActiveType, DeviceType, DomainError, DomainResult, EdgeTrigger, FlushDirection, GpioDirection,
    SpiBitJustification, UartParity,
};
use serde::{Deserialize, Serialize};

/// Maximum buffer length (bytes) accepted for read/write/transfer calls.
pub const MAX_TRANSFER: usize = 4096;

/// A control or data operation on an open slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceRequest {
    // GPIO
    GpioSetDirection { direction: GpioDirection },
    GpioSetValue { value: bool },
    GpioGetValue,
    GpioSetActiveType { active: ActiveType },
    GpioSetEdgeTrigger { edge: EdgeTrigger },

    // PWM
    PwmSetEnabled { enabled: bool },
    PwmSetFrequencyHz { frequency_hz: f64 },
    PwmSetDutyCycle { duty_cycle: f64 },

    // I2C
    I2cRead { length: u32 },
    I2cWrite { data: Vec<u8> },
    I2cReadRegByte { reg: u8 },
    I2cReadRegWord { reg: u8 },
    I2cReadRegBuffer { reg: u8, length: u32 },
    I2cWriteRegByte { reg: u8, data: u8 },
    I2cWriteRegWord { reg: u8, data: u16 },
    I2cWriteRegBuffer { reg: u8, data: Vec<u8> },

    // UART
    UartSetBaudRate { rate: u32 },
    UartSetDataSize { bits: u8 },
    UartSetParity { parity: UartParity },
    UartSetStopBits { bits: u8 },
    UartSetHardwareFlowControl { enabled: bool },
    UartFlush { direction: FlushDirection },
    UartSendBreak { duration_ms: u32 },
    UartRead { length: u32 },
    UartWrite { data: Vec<u8> },

    // SPI
    SpiSetMode { mode: u8 },
    SpiSetFrequencyHz { frequency_hz: u32 },
    SpiSetBitsPerWord { bits: u8 },
    SpiSetBitJustification { justification: SpiBitJustification },
    SpiSetCsChange { change: bool },
    SpiSetDelayUs { delay_us: u16 },
    SpiTransfer { data: Vec<u8> },
    SpiRead { length: u32 },
    SpiWrite { data: Vec<u8> },
}

impl DeviceRequest {
    /// The device type this operation applies to.
    #[must_use]
    pub fn device(&self) -> DeviceType {
        match self {
            Self::GpioSetDirection { .. }
            | Self::GpioSetValue { .. }
            | Self::GpioGetValue
            | Self::GpioSetActiveType { .. }
            | Self::GpioSetEdgeTrigger { .. } => DeviceType::Gpio,

            Self::PwmSetEnabled { .. }
            | Self::PwmSetFrequencyHz { .. }
            | Self::PwmSetDutyCycle { .. } => DeviceType::Pwm,

            Self::I2cRead { .. }
            | Self::I2cWrite { .. }
            | Self::I2cReadRegByte { .. }
            | Self::I2cReadRegWord { .. }
            | Self::I2cReadRegBuffer { .. }
            | Self::I2cWriteRegByte { .. }
            | Self::I2cWriteRegWord { .. }
            | Self::I2cWriteRegBuffer { .. } => DeviceType::I2c,

            Self::UartSetBaudRate { .. }
            | Self::UartSetDataSize { .. }
            | Self::UartSetParity { .. }
            | Self::UartSetStopBits { .. }
            | Self::UartSetHardwareFlowControl { .. }
            | Self::UartFlush { .. }
            | Self::UartSendBreak { .. }
            | Self::UartRead { .. }
            | Self::UartWrite { .. } => DeviceType::Uart,

            Self::SpiSetMode { .. }
            | Self::SpiSetFrequencyHz { .. }
            | Self::SpiSetBitsPerWord { .. }
            | Self::SpiSetBitJustification { .. }
            | Self::SpiSetCsChange { .. }
            | Self::SpiSetDelayUs { .. }
            | Self::SpiTransfer { .. }
            | Self::SpiRead { .. }
            | Self::SpiWrite { .. } => DeviceType::Spi,
        }
    }

    /// A short operation name for error messages and logs.
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::GpioSetDirection { .. } => "gpio_set_direction",
            Self::GpioSetValue { .. } => "gpio_set_value",
            Self::GpioGetValue => "gpio_get_value",
            Self::GpioSetActiveType { .. } => "gpio_set_active_type",
            Self::GpioSetEdgeTrigger { .. } => "gpio_set_edge_trigger",
            Self::PwmSetEnabled { .. } => "pwm_set_enabled",
            Self::PwmSetFrequencyHz { .. } => "pwm_set_frequency_hz",
            Self::PwmSetDutyCycle { .. } => "pwm_set_duty_cycle",
            Self::I2cRead { .. } => "i2c_read",
            Self::I2cWrite { .. } => "i2c_write",
            Self::I2cReadRegByte { .. } => "i2c_read_reg_byte",
            Self::I2cReadRegWord { .. } => "i2c_read_reg_word",
            Self::I2cReadRegBuffer { .. } => "i2c_read_reg_buffer",
            Self::I2cWriteRegByte { .. } => "i2c_write_reg_byte",
            Self::I2cWriteRegWord { .. } => "i2c_write_reg_word",
            Self::I2cWriteRegBuffer { .. } => "i2c_write_reg_buffer",
            Self::UartSetBaudRate { .. } => "uart_set_baud_rate",
            Self::UartSetDataSize { .. } => "uart_set_data_size",
            Self::UartSetParity { .. } => "uart_set_parity",
            Self::UartSetStopBits { .. } => "uart_set_stop_bits",
            Self::UartSetHardwareFlowControl { .. } => "uart_set_hardware_flow_control",
            Self::UartFlush { .. } => "uart_flush",
            Self::UartSendBreak { .. } => "uart_send_break",
            Self::UartRead { .. } => "uart_read",
            Self::UartWrite { .. } => "uart_write",
            Self::SpiSetMode { .. } => "spi_set_mode",
            Self::SpiSetFrequencyHz { .. } => "spi_set_frequency_hz",
            Self::SpiSetBitsPerWord { .. } => "spi_set_bits_per_word",
            Self::SpiSetBitJustification { .. } => "spi_set_bit_justification",
            Self::SpiSetCsChange { .. } => "spi_set_cs_change",
            Self::SpiSetDelayUs { .. } => "spi_set_delay_us",
            Self::SpiTransfer { .. } => "spi_transfer",
            Self::SpiRead { .. } => "spi_read",
            Self::SpiWrite { .. } => "spi_write",
        }
    }

    /// Validates argument ranges, without touching any driver.
    ///
    /// Callers must also check `device()` against the addressed slot's type;
    /// `validate` only covers value ranges.
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Self::PwmSetFrequencyHz { frequency_hz } => {
                if !frequency_hz.is_finite() || *frequency_hz <= 0.0 {
                    return Err(DomainError::invalid("frequency_hz", frequency_hz, "> 0"));
                }
            }
            Self::PwmSetDutyCycle { duty_cycle } => {
                // Duty cycle is a percentage, 0..=100.
                if !duty_cycle.is_finite() || !(0.0..=100.0).contains(duty_cycle) {
                    return Err(DomainError::invalid("duty_cycle", duty_cycle, "0..=100"));
                }
            }
            Self::UartSetBaudRate { rate } => {
                if *rate == 0 {
                    return Err(DomainError::invalid("rate", rate, "> 0"));
                }
            }
            Self::UartSetDataSize { bits } => {
                if !(5..=8).contains(bits) {
                    return Err(DomainError::invalid("bits", bits, "5..=8"));
                }
            }
            Self::UartSetStopBits { bits } => {
                if !(1..=2).contains(bits) {
                    return Err(DomainError::invalid("bits", bits, "1..=2"));
                }
            }
            Self::UartSendBreak { duration_ms } => {
                if *duration_ms == 0 {
                    return Err(DomainError::invalid("duration_ms", duration_ms, "> 0"));
                }
            }
            Self::SpiSetMode { mode } => {
                if *mode > 3 {
                    return Err(DomainError::invalid("mode", mode, "0..=3"));
                }
            }
            Self::SpiSetFrequencyHz { frequency_hz } => {
                if *frequency_hz == 0 {
                    return Err(DomainError::invalid("frequency_hz", frequency_hz, "> 0"));
                }
            }
            Self::SpiSetBitsPerWord { bits } => {
                if !(1..=32).contains(bits) {
                    return Err(DomainError::invalid("bits", bits, "1..=32"));
                }
            }
            Self::I2cRead { length }
            | Self::I2cReadRegBuffer { length, .. }
            | Self::UartRead { length }
            | Self::SpiRead { length } => {
                validate_length(*length as usize)?;
            }
            Self::I2cWrite { data }
            | Self::I2cWriteRegBuffer { data, .. }
            | Self::UartWrite { data }
            | Self::SpiTransfer { data }
            | Self::SpiWrite { data } => {
                validate_length(data.len())?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn validate_length(length: usize) -> DomainResult<()> {
    if length == 0 || length > MAX_TRANSFER {
        return Err(DomainError::invalid("length", length, "1..=4096"));
    }
    Ok(())
}

/// The result of a successful `DeviceRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceResponse {
    /// Operation completed, nothing to return.
    Ack,
    /// A boolean value (GPIO level).
    Value { value: bool },
    /// A single byte (I2C register read).
    Byte { value: u8 },
    /// A 16-bit word (I2C register read).
    Word { value: u16 },
    /// Raw bytes (reads, SPI transfer results).
    Bytes { data: Vec<u8> },
    /// Number of bytes accepted by a write.
    Written { count: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_classification() {
        assert_eq!(DeviceRequest::GpioGetValue.device(), DeviceType::Gpio);
        assert_eq!(
            DeviceRequest::UartSetBaudRate { rate: 115200 }.device(),
            DeviceType::Uart
        );
        assert_eq!(
            DeviceRequest::I2cReadRegByte { reg: 0x10 }.device(),
            DeviceType::I2c
        );
    }

    #[test]
    fn test_negative_frequency_rejected() {
        let req = DeviceRequest::PwmSetFrequencyHz { frequency_hz: -1.0 };
        assert!(req.validate().is_err());

        let req = DeviceRequest::PwmSetFrequencyHz { frequency_hz: 0.0 };
        assert!(req.validate().is_err());

        let req = DeviceRequest::PwmSetFrequencyHz { frequency_hz: 50.0 };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_duty_cycle_range() {
        assert!(DeviceRequest::PwmSetDutyCycle { duty_cycle: 101.0 }
            .validate()
            .is_err());
        assert!(DeviceRequest::PwmSetDutyCycle { duty_cycle: -0.1 }
            .validate()
            .is_err());
        assert!(DeviceRequest::PwmSetDutyCycle { duty_cycle: 100.0 }
            .validate()
            .is_ok());
    }

    #[test]
    fn test_spi_mode_range() {
        assert!(DeviceRequest::SpiSetMode { mode: 4 }.validate().is_err());
        assert!(DeviceRequest::SpiSetMode { mode: 3 }.validate().is_ok());
    }

    #[test]
    fn test_transfer_length_bounds() {
        assert!(DeviceRequest::UartRead { length: 0 }.validate().is_err());
        assert!(DeviceRequest::UartRead {
            length: (MAX_TRANSFER + 1) as u32
        }
        .validate()
        .is_err());
        assert!(DeviceRequest::UartRead { length: 16 }.validate().is_ok());

        let oversized = DeviceRequest::SpiTransfer {
            data: vec![0u8; MAX_TRANSFER + 1],
        };
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_request_serialization() {
        let req = DeviceRequest::UartSetBaudRate { rate: 9600 };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"op\":\"uart_set_baud_rate\""));
        assert!(json.contains("\"rate\":9600"));

        let parsed: DeviceRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_response_serialization() {
        let resp = DeviceResponse::Bytes {
            data: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"kind\":\"bytes\""));
    }
}
