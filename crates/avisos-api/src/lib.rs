// avisos-api: Wire types for the hospital notification WebSocket stream.

pub mod endpoint;
pub mod error;
pub mod message;

pub use endpoint::Endpoint;
pub use error::Error;
pub use message::{EventKind, InboundMessage, OutboundMessage, ReloadEntity};
