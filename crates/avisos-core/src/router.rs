//! Message router: gives meaning to inbound frames.
//!
//! For every text frame the router parses the envelope and then, in
//! fixed order per message: invokes the presenter, emits a reload
//! signal when the kind maps to an entity, and fans the message out to
//! registered listeners. The last-seen message is always recorded for
//! polling-style consumers, matching kinds or not.
//!
//! A malformed frame is logged and dropped; it never touches the
//! connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use avisos_api::{EventKind, InboundMessage};

use crate::presenter::{Presentation, Presenter};
use crate::registry::ListenerRegistry;
use crate::reload::ReloadBus;

/// The last message seen on the stream, kept for late consumers that
/// poll instead of subscribing.
#[derive(Debug, Clone)]
pub struct LastUpdate {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// The full parsed payload.
    pub message: Arc<InboundMessage>,
}

pub(crate) struct MessageRouter {
    registry: ListenerRegistry,
    reload: ReloadBus,
    presenter: Arc<dyn Presenter>,
    last_update: watch::Sender<Option<LastUpdate>>,
    log: Mutex<VecDeque<Arc<InboundMessage>>>,
    log_capacity: usize,
}

impl MessageRouter {
    pub(crate) fn new(
        registry: ListenerRegistry,
        reload: ReloadBus,
        presenter: Arc<dyn Presenter>,
        log_capacity: usize,
    ) -> Self {
        let (last_update, _) = watch::channel(None);
        Self {
            registry,
            reload,
            presenter,
            last_update,
            log: Mutex::new(VecDeque::new()),
            log_capacity,
        }
    }

    /// Handle one raw text frame from the transport.
    pub(crate) fn handle_frame(&self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(msg) => self.route(&Arc::new(msg)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
            }
        }
    }

    /// Route one parsed message.
    fn route(&self, msg: &Arc<InboundMessage>) {
        tracing::debug!(kind = %msg.kind, "inbound message");

        if let Some(presentation) = Presentation::for_message(msg) {
            self.presenter.present(&presentation);
        } else {
            tracing::debug!(kind = %msg.kind, "unhandled message kind");
        }

        if let Some(entity) = msg.kind.reload_entity() {
            self.reload.emit(entity);
        }

        self.registry.dispatch(msg);

        self.record(msg);
    }

    /// Record the message in the bounded log and as the last update.
    fn record(&self, msg: &Arc<InboundMessage>) {
        {
            let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
            if log.len() == self.log_capacity {
                log.pop_front();
            }
            log.push_back(Arc::clone(msg));
        }

        // send_replace: the value must land even with no receiver yet,
        // so a late subscriber still sees the most recent message.
        self.last_update.send_replace(Some(LastUpdate {
            kind: msg.kind.clone(),
            timestamp: Utc::now(),
            message: Arc::clone(msg),
        }));
    }

    pub(crate) fn last_update(&self) -> watch::Receiver<Option<LastUpdate>> {
        self.last_update.subscribe()
    }

    /// Recent messages, oldest first.
    pub(crate) fn recent(&self) -> Vec<Arc<InboundMessage>> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.iter().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.clear();
    }
}
