// ── Core error types ──
//
// Almost everything in this subsystem is absorbed rather than raised:
// transport failures become state transitions, malformed frames become
// log entries. Only programmer-facing configuration problems surface
// as errors.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The configured endpoint cannot produce a valid connect URL.
    #[error("Notification endpoint rejected: {0}")]
    Endpoint(#[from] avisos_api::Error),
}
