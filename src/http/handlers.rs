use super::state::AppState;
use crate::error::SessionError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    /// Status line the widget shows for this failure
    pub status: String,
}

// ============================================================================
// Handlers
// ============================================================================

fn session_error(err: &SessionError) -> Response {
    let code = match err {
        SessionError::InvalidState { .. } | SessionError::Cancelled => StatusCode::CONFLICT,
        SessionError::MissingCredential | SessionError::PermissionDenied(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
        SessionError::Close(_) | SessionError::Audio(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        code,
        Json(ErrorResponse {
            error: err.to_string(),
            status: err.status_text().to_string(),
        }),
    )
        .into_response()
}

fn snapshot(state: &AppState) -> Response {
    (StatusCode::OK, Json(state.widget.snapshot())).into_response()
}

/// POST /widget/open
/// Open a new voice session, replacing any current one
pub async fn open_widget(State(state): State<AppState>) -> impl IntoResponse {
    info!("Opening voice widget");

    match state.widget.open().await {
        Ok(()) => snapshot(&state),
        Err(e) => {
            error!("Failed to open voice session: {}", e);
            session_error(&e)
        }
    }
}

/// POST /widget/close
/// Close the current session
pub async fn close_widget(State(state): State<AppState>) -> impl IntoResponse {
    if state.widget.close() {
        info!("Voice widget closed");
    }
    snapshot(&state)
}

/// POST /widget/toggle
/// Open when closed, close when open
pub async fn toggle_widget(State(state): State<AppState>) -> impl IntoResponse {
    match state.widget.toggle().await {
        Ok(open) => {
            info!("Voice widget {}", if open { "opened" } else { "closed" });
            snapshot(&state)
        }
        Err(e) => {
            error!("Failed to open voice session: {}", e);
            session_error(&e)
        }
    }
}

/// POST /widget/mute
/// Mute or unmute the microphone without closing the session
pub async fn set_muted(
    State(state): State<AppState>,
    Json(req): Json<MuteRequest>,
) -> impl IntoResponse {
    state.widget.set_muted(req.muted);
    snapshot(&state)
}

/// GET /widget/status
/// Connection, mute, volume and status text of the widget
pub async fn widget_status(State(state): State<AppState>) -> impl IntoResponse {
    snapshot(&state)
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
