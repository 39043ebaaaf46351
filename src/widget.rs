//! The floating voice assistant widget
//!
//! Holds at most one `RealtimeVoiceSession`. Opening replaces (and closes)
//! whatever session was there before; the mute choice outlives sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::info;

use crate::audio::AudioPlatform;
use crate::error::SessionResult;
use crate::live::LiveConnector;
use crate::session::{RealtimeVoiceSession, SessionConfig, SessionStats, SessionStatus};

/// What the presentation layer renders
#[derive(Debug, Clone, Serialize)]
pub struct WidgetSnapshot {
    /// Panel expanded; a session exists, possibly already failed
    pub is_open: bool,
    pub is_connected: bool,
    pub is_muted: bool,
    /// Visualizer level, 0..=255
    pub volume: f32,
    pub status: SessionStatus,
    pub stats: Option<SessionStats>,
}

pub struct VoiceWidget {
    config: SessionConfig,
    connector: Arc<dyn LiveConnector>,
    platform: Arc<dyn AudioPlatform>,
    session: Mutex<Option<Arc<RealtimeVoiceSession>>>,
    muted: AtomicBool,
}

impl VoiceWidget {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn LiveConnector>,
        platform: Arc<dyn AudioPlatform>,
    ) -> Self {
        Self {
            config,
            connector,
            platform,
            session: Mutex::new(None),
            muted: AtomicBool::new(false),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<RealtimeVoiceSession>>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a fresh session, closing the current one first
    ///
    /// The session stays in the widget when opening fails so its status
    /// text remains visible.
    pub async fn open(&self) -> SessionResult<()> {
        let config = SessionConfig {
            session_id: format!("prombot-{}", uuid::Uuid::new_v4()),
            ..self.config.clone()
        };
        let session = Arc::new(RealtimeVoiceSession::new(
            config,
            Arc::clone(&self.connector),
            Arc::clone(&self.platform),
        ));
        session.set_muted(self.muted.load(Ordering::SeqCst));

        let previous = self.slot().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            info!("Replacing session {}", previous.config().session_id);
            previous.close();
        }

        session.open().await
    }

    /// Close and discard the current session. Returns whether there was one.
    pub fn close(&self) -> bool {
        let Some(session) = self.slot().take() else {
            return false;
        };
        session.close();
        true
    }

    /// Open when closed, close when open. Returns whether the widget is now open.
    pub async fn toggle(&self) -> SessionResult<bool> {
        if self.is_open() {
            self.close();
            Ok(false)
        } else {
            self.open().await?;
            Ok(true)
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if let Some(session) = self.session() {
            session.set_muted(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    pub fn session(&self) -> Option<Arc<RealtimeVoiceSession>> {
        self.slot().clone()
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        match self.session() {
            Some(session) => {
                let status = session.status();
                WidgetSnapshot {
                    is_open: true,
                    is_connected: status.is_connected(),
                    is_muted: self.is_muted(),
                    volume: session.volume(),
                    status,
                    stats: Some(session.stats()),
                }
            }
            None => WidgetSnapshot {
                is_open: false,
                is_connected: false,
                is_muted: self.is_muted(),
                volume: 0.0,
                status: SessionStatus::idle(),
                stats: None,
            },
        }
    }
}

impl Drop for VoiceWidget {
    fn drop(&mut self) {
        self.close();
    }
}
