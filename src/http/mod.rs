//! HTTP API server for the website's voice widget
//!
//! This module provides a REST API for controlling the widget:
//! - POST /widget/open - Open a new voice session
//! - POST /widget/close - Close the current session
//! - POST /widget/toggle - Open when closed, close when open
//! - POST /widget/mute - Mute or unmute the microphone
//! - GET /widget/status - Query connection, mute, volume and status text
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, MuteRequest};
pub use routes::create_router;
pub use state::AppState;
