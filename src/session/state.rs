use std::fmt;

use serde::Serialize;

/// Status lines shown next to the widget
pub mod status_text {
    pub const INITIALIZING: &str = "Initializing...";
    pub const CONNECTING: &str = "Connecting to Systems...";
    pub const ONLINE: &str = "System Online. Listening...";
    pub const CLOSED: &str = "Connection Closed";
    pub const SYSTEM_ERROR: &str = "System Error";
}

/// Lifecycle of a voice session
///
/// ```text
/// Idle -> Connecting -> Connected -> Closed
///              |            |
///              +-> Error <--+--> Closed
/// ```
/// `Closed` may be reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Error,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Closed)
                | (Connected, Error)
                | (Connected, Closed)
                | (Error, Closed)
                | (Closed, Connecting)
        )
    }

    /// Connecting or connected
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State plus the human readable line that goes with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            message: status_text::INITIALIZING.to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::idle()
    }
}
