//! Notification client: one WebSocket per authenticated session.
//!
//! [`NotifyClient`] is a process-wide service with an explicit
//! lifecycle, created once at application start and independent of any
//! UI element. It owns the transport and the connection state machine:
//!
//! ```text
//! Disconnected → Connecting → Connected → Disconnected
//!                    ↑                        │ unclean close,
//!                    └── fixed-delay retry ───┘ bounded attempts
//! ```
//!
//! Reconnection only follows *unclean* closes, with a fixed delay and a
//! capped attempt count. A clean close (logout, server shutdown) is
//! terminal until the session identity changes or
//! [`ensure_connected`](NotifyClient::ensure_connected) is called
//! again. Pending retry timers die with the connection task, so a
//! `disconnect` while a retry is scheduled never opens a stale
//! transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use avisos_api::{EventKind, InboundMessage, OutboundMessage};

use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::presenter::{Presenter, TracingPresenter};
use crate::registry::{ListenerRegistry, Subscription};
use crate::reload::ReloadBus;
use crate::router::{LastUpdate, MessageRouter};
use crate::session::SessionIdentity;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by any consumer.
///
/// Mutated only by the client's connection task; read through
/// [`NotifyClient::state`] or awaited through
/// [`NotifyClient::state_changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// How a live connection ended.
enum Closure {
    /// Close handshake completed (server- or client-initiated).
    Clean,
    /// Connection dropped without a close handshake.
    Unclean,
    /// Torn down by `disconnect` or an identity change.
    Cancelled,
}

// ── NotifyClient ─────────────────────────────────────────────────

/// Handle to the notification client.
///
/// Cheaply cloneable via `Arc`; all clones drive the same single
/// transport. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct NotifyClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    registry: ListenerRegistry,
    reload: ReloadBus,
    router: MessageRouter,
    session: Mutex<SessionSlot>,
    /// Re-entrancy guard: near-simultaneous `ensure_connected` calls
    /// must not open two transports.
    connecting: AtomicBool,
    /// Generation counter for connection tasks. A superseded task must
    /// not write connection state over its replacement's.
    epoch: AtomicU64,
}

impl Inner {
    /// State write gated on still being the current connection task.
    fn set_state(&self, epoch: u64, state: ConnectionState) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.state.send_replace(state);
        }
    }

    /// Drop the re-entrancy guard, unless a newer task owns it.
    fn clear_connecting(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.connecting.store(false, Ordering::SeqCst);
        }
    }
}

/// Per-session connection bookkeeping.
#[derive(Default)]
struct SessionSlot {
    /// Cached identifier of the connected user, to tell "same user,
    /// already connected" from "user changed".
    user_id: Option<String>,
    /// Cancels the running connection task, including a pending
    /// reconnect timer.
    cancel: Option<CancellationToken>,
    /// Outbound channel into the current connection task.
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
}

impl NotifyClient {
    /// Create a client that logs presentations via `tracing`.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_presenter(config, Arc::new(TracingPresenter))
    }

    /// Create a client with a custom presenter for visual/audio
    /// feedback.
    pub fn with_presenter(config: ClientConfig, presenter: Arc<dyn Presenter>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let registry = ListenerRegistry::new();
        let reload = ReloadBus::new(config.reload_channel_capacity);
        let router = MessageRouter::new(
            registry.clone(),
            reload.clone(),
            presenter,
            config.notification_log_size,
        );

        Self {
            inner: Arc::new(Inner {
                config,
                state,
                registry,
                reload,
                router,
                session: Mutex::new(SessionSlot::default()),
                connecting: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Make sure a transport is open for `identity`.
    ///
    /// No-op when already connected (or connecting) as the same user.
    /// Otherwise tears down any existing connection — including a
    /// pending reconnect timer — and opens a fresh one with a reset
    /// attempt counter. Returns immediately; the open/close outcome
    /// arrives asynchronously via [`state_changes`](Self::state_changes).
    pub fn ensure_connected(&self, identity: &SessionIdentity) -> Result<(), CoreError> {
        let url = self.inner.config.endpoint.url(&identity.token)?;

        let mut slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());

        // The guard only short-circuits for the cached user. A call
        // with a differing identity always replaces whatever is open
        // or in flight.
        if slot.user_id.as_deref() == Some(identity.user_id.as_str()) {
            let state = *self.inner.state.borrow();
            if state == ConnectionState::Connected || state == ConnectionState::Connecting {
                tracing::debug!(user = %identity.user_id, "already connected, skipping");
                return Ok(());
            }
            if self.inner.connecting.load(Ordering::SeqCst) {
                tracing::debug!(user = %identity.user_id, "connection attempt already in flight, skipping");
                return Ok(());
            }
        }

        // Supersede the previous task before cancelling it, so its
        // dying state writes (and its guard clear) are ignored.
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.connecting.store(true, Ordering::SeqCst);
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        slot.user_id = Some(identity.user_id.clone());
        slot.cancel = Some(cancel.clone());
        slot.outbound = Some(out_tx);
        drop(slot);

        tracing::info!(user = %identity.user_id, "opening notification connection");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(connection_task(inner, epoch, url, cancel, out_rx));
        Ok(())
    }

    /// Close the connection and forget the cached identity.
    ///
    /// Used on logout and at application teardown. Synchronous from the
    /// caller's point of view; the `Disconnected` transition is
    /// confirmed asynchronously once the close frame is on the wire.
    /// Cancels a pending reconnect timer, if any.
    pub fn disconnect(&self, reason: &str) {
        let cancel = {
            let mut slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
            slot.user_id = None;
            slot.outbound = None;
            slot.cancel.take()
        };
        self.inner.connecting.store(false, Ordering::SeqCst);

        if let Some(cancel) = cancel {
            let state = *self.inner.state.borrow();
            if state == ConnectionState::Connected || state == ConnectionState::Connecting {
                self.inner.state.send_replace(ConnectionState::Closing);
            }
            tracing::info!(reason, "closing notification connection");
            cancel.cancel();
        }
    }

    /// Observe a session store and keep the connection in step with it:
    /// identity present → connect, identity absent → disconnect,
    /// identity changed → reconnect as the new user.
    pub fn watch_session(
        &self,
        mut sessions: watch::Receiver<Option<SessionIdentity>>,
    ) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let identity = sessions.borrow_and_update().clone();
                match identity {
                    Some(identity) => {
                        if let Err(e) = client.ensure_connected(&identity) {
                            tracing::error!(error = %e, "cannot open notification connection");
                        }
                    }
                    None => client.disconnect("session ended"),
                }
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Transmit a message if connected; silently drop otherwise.
    ///
    /// Fire-and-forget by design: outbound messages are transient
    /// presence/ack notices, not commands needing delivery guarantees.
    pub fn send(&self, message: &OutboundMessage) {
        if *self.inner.state.borrow() != ConnectionState::Connected {
            tracing::trace!(kind = %message.kind, "not connected, dropping outbound message");
            return;
        }
        let slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = &slot.outbound {
            let _ = tx.send(message.clone());
        }
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Register a callback for messages of exactly `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.registry.subscribe(kind, callback)
    }

    /// Remove a previously registered callback.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner.registry.unsubscribe(subscription);
    }

    /// The reload broadcast bus.
    pub fn reloads(&self) -> &ReloadBus {
        &self.inner.reload
    }

    // ── State observation ────────────────────────────────────────

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Last message seen on the stream, for polling-style consumers.
    pub fn last_update(&self) -> watch::Receiver<Option<LastUpdate>> {
        self.inner.router.last_update()
    }

    /// Recent notifications, oldest first.
    pub fn recent_notifications(&self) -> Vec<Arc<InboundMessage>> {
        self.inner.router.recent()
    }

    pub fn clear_notifications(&self) {
        self.inner.router.clear();
    }
}

// ── Connection task ──────────────────────────────────────────────

/// Owns the transport for one session: connect, read, and on unclean
/// closes retry with a fixed delay up to the configured cap.
async fn connection_task(
    inner: Arc<Inner>,
    epoch: u64,
    url: Url,
    cancel: CancellationToken,
    mut out_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let mut attempts: u32 = 0;

    loop {
        inner.set_state(epoch, ConnectionState::Connecting);

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                inner.clear_connecting(epoch);
                inner.set_state(epoch, ConnectionState::Disconnected);
                break;
            }
            result = connect_async(url.as_str()) => {
                inner.clear_connecting(epoch);
                match result {
                    Ok((stream, _response)) => Some(stream),
                    Err(e) => {
                        tracing::warn!(error = %e, attempt = attempts, "connection attempt failed");
                        None
                    }
                }
            }
        };

        match connected {
            Some(stream) => {
                tracing::info!("notification stream connected");
                inner.set_state(epoch, ConnectionState::Connected);
                attempts = 0;

                let closure = run_connection(&inner, stream, &cancel, &mut out_rx).await;
                inner.set_state(epoch, ConnectionState::Disconnected);

                match closure {
                    Closure::Cancelled => break,
                    Closure::Clean => {
                        tracing::info!("stream closed cleanly, not reconnecting");
                        break;
                    }
                    Closure::Unclean => {
                        tracing::warn!("stream dropped uncleanly");
                    }
                }
            }
            None => {
                inner.set_state(epoch, ConnectionState::Disconnected);
            }
        }

        // Unclean path: bounded, fixed-delay, cancellable retry.
        if attempts >= inner.config.max_reconnect_attempts {
            tracing::warn!(
                max = inner.config.max_reconnect_attempts,
                "reconnect attempts exhausted, staying disconnected"
            );
            break;
        }
        attempts += 1;
        tracing::info!(
            attempt = attempts,
            max = inner.config.max_reconnect_attempts,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }

    tracing::debug!("connection task exiting");
}

/// Drive one live connection until it ends, routing inbound frames and
/// flushing outbound messages.
async fn run_connection(
    inner: &Inner,
    stream: WsStream,
    cancel: &CancellationToken,
    out_rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
) -> Closure {
    let (mut write, mut read) = stream.split();
    let mut outbound_open = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    tracing::debug!(error = %e, "close frame not delivered");
                }
                return Closure::Cancelled;
            }
            outbound = out_rx.recv(), if outbound_open => {
                match outbound {
                    Some(message) => match serde_json::to_string(&message) {
                        Ok(json) => {
                            if let Err(e) = write.send(Message::Text(json.into())).await {
                                tracing::warn!(error = %e, "outbound send failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "outbound message not serializable");
                        }
                    },
                    None => outbound_open = false,
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        inner.router.handle_frame(text.as_str());
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pings automatically
                        tracing::trace!("ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(cf) = &frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "close frame received");
                        } else {
                            tracing::info!("close frame received (no payload)");
                        }
                        return Closure::Clean;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "stream error");
                        return Closure::Unclean;
                    }
                    None => {
                        tracing::warn!("stream ended without close handshake");
                        return Closure::Unclean;
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, raw frames -- ignore
                    }
                }
            }
        }
    }
}
