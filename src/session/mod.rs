//! Realtime voice session management
//!
//! This module provides the `RealtimeVoiceSession` abstraction that manages:
//! - Microphone capture and outbound streaming to the live endpoint
//! - Gapless scheduling of synthesized speech and interruption handling
//! - Mute, status and visualizer level exposed to the widget
//! - Deterministic teardown of every acquired resource

mod config;
mod session;
mod state;
mod stats;

pub use config::{SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE, PROMBOT_PERSONA};
pub use session::RealtimeVoiceSession;
pub use state::{status_text, SessionState, SessionStatus};
pub use stats::SessionStats;
