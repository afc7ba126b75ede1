//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use avisos_core::CoreError;

/// Exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Invalid notification endpoint")]
    #[diagnostic(
        code(avisos::bad_endpoint),
        help("Check --host, --port and --path. Example: avisos --host 10.0.0.5 --port 8000")
    )]
    Endpoint(#[from] CoreError),

    #[error("Could not reach the notification stream at {url}")]
    #[diagnostic(
        code(avisos::connect_timeout),
        help(
            "Check that the hospital backend is running and the token is valid.\n\
             The client retries unclean failures 3 times before giving up."
        )
    )]
    ConnectTimeout { url: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Endpoint(_) => exit_code::GENERAL,
            Self::ConnectTimeout { .. } => exit_code::CONNECTION,
        }
    }
}
