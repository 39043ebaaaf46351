use thiserror::Error;

use crate::session::SessionState;

/// Failures of a realtime voice session.
///
/// None of these are retried. Each one maps to a short status line shown to
/// the user and leaves the session `Closed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("no API key configured")]
    MissingCredential,

    #[error("transport error: {0}")]
    Transport(String),

    /// Raised while tearing down an already degraded connection. Logged, never propagated.
    #[error("failed to close connection: {0}")]
    Close(String),

    #[error("audio pipeline error: {0}")]
    Audio(String),

    /// The session was closed while `open()` was still in progress
    #[error("session closed before it finished opening")]
    Cancelled,

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl SessionError {
    /// Status line surfaced to the user for this failure
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "Error: Microphone Access Denied",
            SessionError::MissingCredential => "Error: Missing API Key",
            SessionError::Transport(_) => "System Error",
            SessionError::Close(_) | SessionError::Cancelled => "Connection Closed",
            SessionError::Audio(_) | SessionError::InvalidState { .. } => "Initialization Failed",
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
