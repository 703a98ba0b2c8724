//! Crate-level error type.
//!
//! Every failure in the messaging core is local to the running process: there
//! is no server to retry against, so none of these variants are retried by the
//! library. Callers decide whether to surface, ignore, or re-attempt.

use thiserror::Error;

/// Errors produced by identity, bus, store, session, config and generation code.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A required primitive (random source, async runtime) is missing.
    #[error("environment unsupported: {0}")]
    EnvironmentUnsupported(String),

    /// The room bus cannot be opened or published to.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Empty room name, empty message text, or malformed user data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A message was sent while no room was active.
    #[error("not in a room")]
    NotInRoom,

    /// A transport payload could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The generative content provider returned an error or nothing at all.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
