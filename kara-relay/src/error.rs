//! Error types for kara-relay
//!
//! `Error` covers startup and I/O failures. `SessionError` covers domain
//! errors raised while handling a control command; those are reported to the
//! requesting connection as `error{message}` and never change session state.

use kara_common::effects::EffectError;
use kara_common::protocol::CommandError;
use thiserror::Error;

/// Main error type for kara-relay
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Errors from shared code
    #[error(transparent)]
    Common(#[from] kara_common::Error),

    /// Supervisor task is gone
    #[error("Supervisor unavailable")]
    SupervisorGone,
}

/// Convenience Result type using kara-relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Domain errors reported to the requesting connection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Song not found: {0}")]
    SongNotFound(String),

    #[error("No song loaded. Please select a song first.")]
    NoSongLoaded,

    #[error("Session already in progress. Stop current session first.")]
    SessionInProgress,

    #[error("No active session. Load a song first.")]
    NoActiveSession,

    #[error("Song directory not found: {0}")]
    SongDirectoryMissing(String),

    #[error("Unknown voice effect: {0}")]
    UnknownEffect(String),

    #[error("Invalid value for {effect}: {reason}")]
    InvalidEffectValue { effect: String, reason: String },

    #[error("Unknown voice preset: {0}")]
    UnknownPreset(String),

    #[error("Session is controlled by another connection")]
    NotSessionOwner,

    #[error("Failed to start karaoke: {0}")]
    SpawnFailed(String),

    #[error(transparent)]
    InvalidCommand(#[from] CommandError),
}

impl From<EffectError> for SessionError {
    fn from(err: EffectError) -> Self {
        match err {
            EffectError::UnknownEffect(name) => SessionError::UnknownEffect(name),
            EffectError::InvalidValue { effect, reason } => {
                SessionError::InvalidEffectValue { effect, reason }
            }
            EffectError::UnknownPreset(name) => SessionError::UnknownPreset(name),
        }
    }
}
