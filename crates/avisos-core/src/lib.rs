// avisos-core: Real-time notification client for the hospital frontend shell.
//
// One WebSocket per authenticated session, with bounded reconnection,
// typed message routing, per-type listener fan-out, and coarse-grained
// reload broadcasting for screens that only care "did entity X change".

pub mod client;
pub mod config;
pub mod error;
pub mod presenter;
pub mod registry;
pub mod reload;
pub mod router;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{ConnectionState, NotifyClient};
pub use config::ClientConfig;
pub use error::CoreError;
pub use presenter::{Presentation, Presenter, Severity, TracingPresenter};
pub use registry::{ListenerRegistry, Subscription};
pub use reload::{EntityReloads, ReloadBus, ReloadSignal};
pub use router::LastUpdate;
pub use session::SessionIdentity;

// Re-export the wire types consumers handle directly.
pub use avisos_api::{Endpoint, EventKind, InboundMessage, OutboundMessage, ReloadEntity};
