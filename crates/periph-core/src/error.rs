//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain-level validation.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// An argument is outside its declared range.
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidArgument {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A control operation was addressed to the wrong device type.
    #[error("operation {op} does not apply to {device}")]
    WrongDevice { op: &'static str, device: String },
}

impl DomainError {
    /// Creates an invalid-argument error from any displayable value.
    pub fn invalid<V: std::fmt::Display>(
        field: &'static str,
        value: V,
        expected: &'static str,
    ) -> Self {
        Self::InvalidArgument {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = DomainError::invalid("frequency_hz", -5.0, "> 0");
        assert_eq!(err.to_string(), "invalid frequency_hz: -5 (expected > 0)");
    }

    #[test]
    fn test_wrong_device_display() {
        let err = DomainError::WrongDevice {
            op: "pwm_set_enabled",
            device: "gpio".to_string(),
        };
        assert_eq!(err.to_string(), "operation pwm_set_enabled does not apply to gpio");
    }
}
