// ── Reload broadcaster ──
//
// Coarse-grained "entity changed" signaling. Screens holding cached
// lists of appointments, prescriptions, or visits refetch when the
// matching signal arrives, without subscribing to individual message
// types and without importing the connection layer.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use avisos_api::ReloadEntity;

/// One "entity X changed server-side" notification.
#[derive(Debug, Clone)]
pub struct ReloadSignal {
    pub entity: ReloadEntity,
    pub timestamp: DateTime<Utc>,
}

/// Process-wide publish/subscribe channel for reload signals.
///
/// Fire-and-forget: the bus never tracks who is listening, and a
/// receiver that falls behind simply skips the lagged signals — a
/// screen that missed three "citas changed" notices only needs the
/// fact that citas changed, not each occurrence.
#[derive(Clone)]
pub struct ReloadBus {
    tx: broadcast::Sender<ReloadSignal>,
}

impl ReloadBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast that `entity` changed. No-op when nobody listens.
    pub(crate) fn emit(&self, entity: ReloadEntity) {
        let signal = ReloadSignal {
            entity,
            timestamp: Utc::now(),
        };
        // Send errors just mean no active receivers right now.
        let _ = self.tx.send(signal);
    }

    /// Observe every reload signal, for all entities.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadSignal> {
        self.tx.subscribe()
    }

    /// Observe reload signals for a single entity.
    pub fn subscribe_entity(&self, entity: ReloadEntity) -> EntityReloads {
        EntityReloads {
            entity,
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver filtered down to one entity.
pub struct EntityReloads {
    entity: ReloadEntity,
    rx: broadcast::Receiver<ReloadSignal>,
}

impl EntityReloads {
    /// Wait for the next signal for this entity.
    ///
    /// Returns `None` once the bus is gone. Lagging is transparent:
    /// skipped signals for other entities (or missed ones for this
    /// entity) do not surface as errors.
    pub async fn recv(&mut self) -> Option<ReloadSignal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) if signal.entity == self.entity => return Some(signal),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "reload receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
