//! Lease registry using the actor pattern.
//!
//! The registry is the single arbiter for all peripheral leases. It receives
//! commands via a tokio mpsc channel and owns the canonical slot tables and
//! per-session lease sets.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryActor  │────▶│PeripheralDriver │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   slot tables,        │  native
//!         │   (mpsc channel)      │   lease sets          │  open/close
//!         ▼                       ▼                       ▼
//!    Open/Close/Control      one command at a        SimDriver or
//!    ListFree/Listeners      time, atomic checks     board backend
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::mpsc;

use periph_hal::PeripheralDriver;

use crate::events::EventRouter;
use crate::liveness::LivenessMonitor;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_SESSIONS};
pub use commands::{RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor keeps a clone of its own command sender so liveness cleanup
/// callbacks can re-enter it with `SessionLost` commands.
pub fn spawn_registry(
    driver: Arc<dyn PeripheralDriver>,
    router: Arc<EventRouter>,
    liveness: Arc<LivenessMonitor>,
) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, cmd_tx.clone(), driver, router, liveness);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
