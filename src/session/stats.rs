use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a voice session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the last `open()` began
    pub opened_at: Option<DateTime<Utc>>,

    /// Seconds since `opened_at`
    pub duration_secs: f64,

    /// Captured frames handed to the connection
    pub frames_sent: usize,

    /// Captured frames suppressed while muted
    pub frames_muted: usize,

    /// Captured frames the connection refused (closed or backed up)
    pub frames_dropped: usize,

    /// Synthesized speech chunks scheduled for playback
    pub frames_received: usize,

    /// Speech chunks that could not be decoded
    pub frames_rejected: usize,

    pub interruptions: usize,

    /// Total length of scheduled speech in seconds
    pub scheduled_audio_secs: f64,
}

/// Lock-free counters updated from the pump tasks
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_sent: AtomicUsize,
    pub frames_muted: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub frames_received: AtomicUsize,
    pub frames_rejected: AtomicUsize,
    pub interruptions: AtomicUsize,
    /// Scheduled audio in microseconds
    pub scheduled_audio_us: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_muted,
            &self.frames_dropped,
            &self.frames_received,
            &self.frames_rejected,
            &self.interruptions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.scheduled_audio_us.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, session_id: &str, opened_at: Option<DateTime<Utc>>) -> SessionStats {
        let duration_secs = opened_at
            .map(|at| (Utc::now() - at).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            session_id: session_id.to_string(),
            opened_at,
            duration_secs,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_muted: self.frames_muted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            scheduled_audio_secs: self.scheduled_audio_us.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }
}
