use thiserror::Error;

/// Failure modes of the wire layer.
///
/// Only covers what can go wrong *before* the transport is involved:
/// endpoint construction and frame decoding. Connection-level failures
/// are absorbed by the client's state machine, never surfaced as errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured endpoint does not form a valid URL.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An inbound frame could not be decoded, with the raw body for debugging.
    #[error("Malformed frame: {message}")]
    Parse { message: String, body: String },
}
