//! Periph Core - Shared types for peripheral lease arbitration
//!
//! This crate provides the domain types shared between the daemon (periphd)
//! and the wire protocol (periph-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod control;
pub mod device;
pub mod error;
pub mod session;

// Re-exports for convenience
pub use control::{
    ActiveType, EdgeTrigger, FlushDirection, GpioDirection, SpiBitJustification, UartParity,
};
pub use device::DeviceType;
pub use error::{DomainError, DomainResult};
pub use session::SessionId;
