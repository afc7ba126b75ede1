// ── Listener registry ──
//
// Decouples short-lived UI components from the connection: any number
// of them can register a callback for an event type and tear it down
// again without knowing about each other. Removal is by handle
// identity, never by position — concurrent subscribe/unsubscribe churn
// for the same type reorders entries.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use avisos_api::{EventKind, InboundMessage};

type Callback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Handle to one registered callback.
///
/// Hand it back to [`ListenerRegistry::unsubscribe`] on teardown.
/// Removal is synchronous: once `unsubscribe` returns, the callback
/// will never fire again.
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

/// Subscription table mapping event type → set of callbacks.
///
/// Cheaply cloneable; all clones share the same table.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(u64, Callback)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for messages of exactly `kind`.
    ///
    /// Multiple subscriptions for the same kind are independent and all
    /// fire, once each, per matching message.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut table = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        table
            .entry(kind.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription { kind, id }
    }

    /// Remove exactly the callback behind `subscription`.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut table = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = table.get_mut(&subscription.kind) {
            entries.retain(|(id, _)| *id != subscription.id);
            if entries.is_empty() {
                table.remove(&subscription.kind);
            }
        }
    }

    /// Invoke every callback registered for the message's kind.
    ///
    /// Each invocation is isolated: a panicking callback is logged and
    /// the remaining callbacks still run.
    pub(crate) fn dispatch(&self, msg: &InboundMessage) {
        // Snapshot the callback list so a callback can re-enter the
        // registry (subscribe/unsubscribe) without deadlocking.
        let callbacks: Vec<(u64, Callback)> = {
            let table = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
            match table.get(&msg.kind) {
                Some(entries) => entries
                    .iter()
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect(),
                None => return,
            }
        };

        for (id, callback) in callbacks {
            // Unsubscription is synchronous: an entry removed by an
            // earlier callback in this same dispatch must not fire.
            if !self.still_registered(&msg.kind, id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(msg))).is_err() {
                tracing::error!(kind = %msg.kind, "listener callback panicked");
            }
        }
    }

    fn still_registered(&self, kind: &EventKind, id: u64) -> bool {
        let table = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        table
            .get(kind)
            .is_some_and(|entries| entries.iter().any(|(entry_id, _)| *entry_id == id))
    }

    #[cfg(test)]
    fn listener_count(&self, kind: &EventKind) -> usize {
        let table = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        table.get(kind).map_or(0, Vec::len)
    }
}
