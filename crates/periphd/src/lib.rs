//! Periphd - peripheral arbitration daemon
//!
//! This crate provides the daemon's core infrastructure:
//! - `registry` - Registry actor owning slot tables, leases, and sessions
//! - `events` - Hardware event routing to per-slot listeners
//! - `liveness` - Client liveness tracking and lease reclamation
//! - `server` - Unix socket server for client connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     periphd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│      RegistryActor          │   │
//! │  │ (Unix socket)   │     │  (slot + lease state owner) │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │ connections                 │ driver calls      │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│     │    PeripheralDriver         │   │
//! │  │  (per client)   │     │  (native seam, sim backend) │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │ events                      │ interrupts        │
//! │           └──────────┐     ┌────────────┘                   │
//! │                      ▼     ▼                                │
//! │             ┌─────────────────────┐                         │
//! │             │     EventRouter     │                         │
//! │             │ (per-slot listener) │                         │
//! │             └─────────────────────┘                         │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod events;
pub mod liveness;
pub mod registry;
pub mod server;
