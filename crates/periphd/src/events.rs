//! Hardware event routing.
//!
//! Each open slot carries at most one listener registration. Registering a
//! new listener on a slot silently replaces the previous one; closing the
//! slot or a `Listen::Stop` return clears it. Delivery happens outside the
//! registry actor: the event pump feeds each slot's events to a dedicated
//! delivery worker, so a slow client never stalls lease arbitration and one
//! slot's interrupts arrive at its listener in order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use periph_core::{DeviceType, SessionId};
use periph_hal::HardwareEvent;

/// What the listener wants after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    /// Keep the registration armed.
    Continue,
    /// Drop the registration; no further events for this slot.
    Stop,
}

/// Errors surfaced by event delivery.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The listener's transport failed (client gone, write timeout).
    #[error("listener unreachable: {0}")]
    Unreachable(String),
}

/// A sink for hardware events on one slot.
///
/// The daemon's remote clients implement this over their connection writer;
/// tests implement it over channels.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn deliver(&self, event: HardwareEvent) -> Result<Listen, DeliveryError>;
}

/// One slot's listener registration.
struct Registration {
    session: SessionId,
    listener: Arc<dyn EventListener>,
}

type SlotCell = Arc<Mutex<Option<Registration>>>;

/// Routes hardware events to per-slot listeners.
///
/// The outer map is only touched briefly to find a slot's cell; delivery
/// holds the cell's async mutex so events for one slot serialize while
/// different slots deliver concurrently.
#[derive(Default)]
pub struct EventRouter {
    slots: RwLock<HashMap<(DeviceType, u32), SlotCell>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for a slot, replacing any previous registration.
    pub async fn register(
        &self,
        device: DeviceType,
        index: u32,
        session: SessionId,
        listener: Arc<dyn EventListener>,
    ) {
        let cell = self.cell_or_insert(device, index);
        let mut slot = cell.lock().await;
        if let Some(previous) = slot.as_ref() {
            debug!(
                device = %device,
                index,
                previous = %previous.session,
                session = %session,
                "Replacing slot listener"
            );
        }
        *slot = Some(Registration { session, listener });
    }

    /// Removes a slot's registration if it belongs to `session`.
    ///
    /// Returns true if a registration was removed. A registration owned by
    /// a different session is left in place.
    pub async fn unregister(&self, device: DeviceType, index: u32, session: &SessionId) -> bool {
        let Some(cell) = self.cell(device, index) else {
            return false;
        };
        let mut slot = cell.lock().await;
        match slot.as_ref() {
            Some(reg) if reg.session == *session => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Unconditionally clears a slot's registration (slot closed or lease
    /// reclaimed).
    pub async fn clear(&self, device: DeviceType, index: u32) {
        if let Some(cell) = self.cell(device, index) {
            let mut slot = cell.lock().await;
            *slot = None;
        }
    }

    /// Returns the session currently registered on a slot, if any.
    pub async fn registered_session(&self, device: DeviceType, index: u32) -> Option<SessionId> {
        let cell = self.cell(device, index)?;
        let slot = cell.lock().await;
        slot.as_ref().map(|reg| reg.session.clone())
    }

    /// Delivers one hardware event to the slot's listener, if registered.
    ///
    /// Events on unregistered slots are dropped. Delivery failures are
    /// logged and swallowed; the registration stays armed and liveness
    /// tracking reclaims it if the client is really gone.
    pub async fn dispatch(&self, event: HardwareEvent) {
        let Some(cell) = self.cell(event.device, event.index) else {
            return;
        };

        let mut slot = cell.lock().await;
        let Some(reg) = slot.as_ref() else {
            return;
        };

        match reg.listener.deliver(event).await {
            Ok(Listen::Continue) => {}
            Ok(Listen::Stop) => {
                debug!(
                    device = %event.device,
                    index = event.index,
                    session = %reg.session,
                    "Listener requested stop"
                );
                *slot = None;
            }
            Err(e) => {
                warn!(
                    device = %event.device,
                    index = event.index,
                    session = %reg.session,
                    error = %e,
                    "Event delivery failed"
                );
            }
        }
    }

    fn cell(&self, device: DeviceType, index: u32) -> Option<SlotCell> {
        let slots = match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.get(&(device, index)).map(Arc::clone)
    }

    fn cell_or_insert(&self, device: DeviceType, index: u32) -> SlotCell {
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(slots.entry((device, index)).or_default())
    }
}

/// Spawns the event pump: drains the driver's interrupt channel and hands
/// each event to its slot's delivery worker.
///
/// One worker per slot keeps a slot's events in arrival order while a slow
/// listener on one slot never delays another. Workers exit when the pump
/// stops and drops their queues.
pub fn spawn_event_pump(
    mut events: mpsc::UnboundedReceiver<HardwareEvent>,
    router: Arc<EventRouter>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut workers: HashMap<(DeviceType, u32), mpsc::UnboundedSender<HardwareEvent>> =
            HashMap::new();
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Event pump shutting down");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => {
                            let sender = workers
                                .entry((event.device, event.index))
                                .or_insert_with(|| spawn_slot_worker(Arc::clone(&router)));
                            let _ = sender.send(event);
                        }
                        None => {
                            debug!("Driver event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// Spawns one slot's delivery worker: delivers its queue in order and exits
/// when the pump drops the sending side.
fn spawn_slot_worker(router: Arc<EventRouter>) -> mpsc::UnboundedSender<HardwareEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            router.dispatch(event).await;
        }
    });
    tx
}
