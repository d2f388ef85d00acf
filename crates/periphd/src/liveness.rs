//! Client liveness tracking.
//!
//! Every accepted connection subscribes its identity here with a cleanup
//! callback and keeps the returned token. When the connection ends for any
//! reason, the server reports the token lost and the callback releases
//! everything the client held. A graceful disconnect (or a reconnect that
//! replaced the session) unsubscribes first, turning the later report into
//! a no-op, so cleanup runs at most once per subscription regardless of how
//! the connection dies. Reports are token-scoped rather than identity-wide:
//! a stale connection's teardown can never fire the cleanup of a newer
//! session that took over the same identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A subscription receipt. Pass it back to [`LivenessMonitor::unsubscribe`]
/// to cancel the cleanup callback before it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessToken {
    identity: String,
    id: u64,
}

impl LivenessToken {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// Tracks which client identities are alive and what to run when one dies.
#[derive(Default)]
pub struct LivenessMonitor {
    inner: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
    next_id: AtomicU64,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup callback for an identity.
    ///
    /// The callback runs when [`report_lost`](Self::report_lost) is called
    /// for the same identity, unless the token is unsubscribed first.
    pub fn subscribe(
        &self,
        identity: impl Into<String>,
        callback: impl FnOnce() + Send + 'static,
    ) -> LivenessToken {
        let identity = identity.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        inner
            .entry(identity.clone())
            .or_default()
            .push((id, Box::new(callback)));

        debug!(identity = %identity, "Liveness subscription added");
        LivenessToken { identity, id }
    }

    /// Cancels a subscription. Idempotent: unsubscribing a token whose
    /// callback already ran (or was already cancelled) does nothing.
    pub fn unsubscribe(&self, token: &LivenessToken) {
        let mut inner = self.lock();
        if let Some(entries) = inner.get_mut(&token.identity) {
            entries.retain(|(id, _)| *id != token.id);
            if entries.is_empty() {
                inner.remove(&token.identity);
            }
        }
    }

    /// Reports a subscription as gone and runs its cleanup callback.
    ///
    /// Only the reported token's own callback fires; other subscriptions
    /// under the same identity are untouched. The callback is removed
    /// before invocation and runs outside the lock, so it fires at most
    /// once even if this races with another report or an unsubscribe.
    pub fn report_lost(&self, token: &LivenessToken) {
        let callback = {
            let mut inner = self.lock();
            let Some(entries) = inner.get_mut(&token.identity) else {
                return;
            };
            let Some(pos) = entries.iter().position(|(id, _)| *id == token.id) else {
                return;
            };
            let (_, callback) = entries.remove(pos);
            if entries.is_empty() {
                inner.remove(&token.identity);
            }
            callback
        };

        debug!(identity = %token.identity, "Client lost, running cleanup");
        callback();
    }

    /// Returns true if the identity has at least one live subscription.
    pub fn is_tracked(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(u64, Callback)>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
