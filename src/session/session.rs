use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{status_text, SessionState, SessionStatus};
use super::stats::{Counters, SessionStats};
use crate::audio::analyser::{Analyser, FFT_SIZE};
use crate::audio::{
    convert, pcm, AudioBackend, AudioBackendConfig, AudioFrame, AudioPlatform, InboundFrame,
    PcmBlob, PlaybackScheduler, ScheduledFrame,
};
use crate::error::{SessionError, SessionResult};
use crate::live::{LiveConnection, LiveConnector, LiveEvent, LiveSetup};

/// One realtime voice conversation
///
/// Owns the capture pipeline, the output pipeline with its playback
/// schedule, and the live connection. All of them are created by `open()`
/// and released by a single teardown path that runs on `close()`, on
/// unrecoverable errors and on drop.
pub struct RealtimeVoiceSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn LiveConnector>,
    platform: Arc<dyn AudioPlatform>,

    status: watch::Sender<SessionStatus>,

    /// Visualizer level, 0..=255
    volume: watch::Sender<f32>,

    muted: AtomicBool,

    /// Bumped by every teardown; an `open()` that sees it change was cancelled
    epoch: AtomicU64,

    capture: Mutex<Option<Box<dyn AudioBackend>>>,

    /// `None` outside an open session, so nothing can be scheduled after close
    playback: Mutex<Option<PlaybackScheduler>>,

    /// Set once on successful connect, cleared by teardown
    connection: Mutex<Option<Box<dyn LiveConnection>>>,

    /// Uplink, downlink and meter tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,

    counters: Counters,
    opened_at: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RealtimeVoiceSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn LiveConnector>,
        platform: Arc<dyn AudioPlatform>,
    ) -> Self {
        info!("Creating voice session: {}", config.session_id);

        let (status, _) = watch::channel(SessionStatus::idle());
        let (volume, _) = watch::channel(0.0);

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                platform,
                status,
                volume,
                muted: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                capture: Mutex::new(None),
                playback: Mutex::new(None),
                connection: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                counters: Counters::default(),
                opened_at: Mutex::new(None),
            }),
        }
    }

    /// Acquire the microphone, build both pipelines and connect
    ///
    /// Accepted only from `Idle` or `Closed`. On failure the session ends up
    /// `Closed` with the failure's status text and every acquired resource
    /// released.
    pub async fn open(&self) -> SessionResult<()> {
        let inner = &self.inner;

        // Each open gets its own epoch, taken atomically with the transition
        let mut epoch = 0;
        let started = inner.transition_when(
            SessionState::Connecting,
            Some(status_text::CONNECTING),
            || {
                epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                true
            },
        );
        if !started {
            return Err(SessionError::InvalidState {
                operation: "open",
                state: self.state(),
            });
        }

        info!("Opening voice session: {}", inner.config.session_id);
        inner.counters.reset();
        *lock(&inner.opened_at) = Some(Utc::now());

        match Inner::establish(inner, epoch).await {
            Ok(()) => Ok(()),
            Err(SessionError::Cancelled) => {
                info!("Session closed while opening");
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                if inner.fail_current(epoch, &e) {
                    error!("Failed to open voice session: {}", e);
                    Err(e)
                } else {
                    info!("Session closed while opening: {}", e);
                    Err(SessionError::Cancelled)
                }
            }
        }
    }

    /// Encode a captured frame and queue it for transmission
    ///
    /// Returns whether the frame was handed to the connection. Never waits.
    pub fn send_captured_audio(&self, frame: AudioFrame) -> bool {
        self.inner.send_captured_audio(frame)
    }

    /// Decode a synthesized speech chunk and schedule it after the previous one
    pub fn on_remote_audio(&self, blob: &PcmBlob) -> Option<ScheduledFrame> {
        self.inner.on_remote_audio(blob)
    }

    /// Cut all scheduled and playing speech. Returns how many buffers were stopped.
    pub fn on_interruption(&self) -> usize {
        self.inner.on_interruption()
    }

    /// Toggle transmission of captured audio; capture keeps running
    pub fn set_muted(&self, muted: bool) {
        let previous = self.inner.muted.swap(muted, Ordering::SeqCst);
        if previous != muted {
            info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        }
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Release everything and move to `Closed`
    ///
    /// Idempotent. When this returns no frame is transmitted or scheduled
    /// and no task of this session runs anymore.
    pub fn close(&self) {
        self.inner.finish(status_text::CLOSED);
    }

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn volume(&self) -> f32 {
        *self.inner.volume.borrow()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.inner.volume.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        let opened_at = *lock(&self.inner.opened_at);
        self.inner
            .counters
            .snapshot(&self.inner.config.session_id, opened_at)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Clock time the next inbound frame would start at, if playback is open
    pub fn schedule_cursor(&self) -> Option<Duration> {
        lock(&self.inner.playback)
            .as_ref()
            .map(PlaybackScheduler::next_start)
    }

    /// Buffers still scheduled or playing
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.playback)
            .as_mut()
            .map(PlaybackScheduler::in_flight)
            .unwrap_or(0)
    }

    /// Whether a capture device or output pipeline is still held
    pub fn holds_resources(&self) -> bool {
        lock(&self.inner.capture).is_some()
            || lock(&self.inner.playback).is_some()
            || lock(&self.inner.connection).is_some()
    }

    /// Wait until the session reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|s| s.state == SessionState::Closed)
            .await
            .map(|_| ());
        if let Err(e) = result {
            debug!("Status channel ended: {}", e);
        }
    }
}

impl Drop for RealtimeVoiceSession {
    fn drop(&mut self) {
        if self.state().is_active() {
            self.close();
        }
    }
}

/// Resources acquired by an `open()` that are not yet installed
///
/// Whatever is still held when this drops is released, so a failed or
/// cancelled open never touches the session's installed resources.
#[derive(Default)]
struct Pending {
    capture: Option<Box<dyn AudioBackend>>,
    playback: Option<PlaybackScheduler>,
    connection: Option<Box<dyn LiveConnection>>,
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                warn!("Failed to release capture: {}", e);
            }
        }
        if let Some(mut scheduler) = self.playback.take() {
            scheduler.close();
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                warn!("Ignoring error while closing live connection: {}", e);
            }
        }
    }
}

impl Inner {
    async fn establish(this: &Arc<Inner>, epoch: u64) -> SessionResult<()> {
        let config = &this.config;
        let mut pending = Pending::default();

        let api_key = config
            .credential()
            .ok_or(SessionError::MissingCredential)?
            .to_string();

        let capture = this.platform.open_capture(AudioBackendConfig {
            sample_rate: config.input_sample_rate,
            channels: 1,
            buffer_size: config.capture_buffer_size,
        })?;
        let frames = pending.capture.insert(capture).start().await?;
        this.ensure_current(epoch)?;

        let sink = this.platform.open_playback(config.output_sample_rate)?;
        pending.playback = Some(PlaybackScheduler::new(sink));

        let setup = LiveSetup {
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
        };
        let connected = this.connector.connect(&setup).await.map(|channel| {
            pending.connection = Some(channel.connection);
            channel.events
        });
        this.ensure_current(epoch)?;
        let events = connected?;

        // Install everything in one step. A teardown that bumped the epoch
        // first makes the transition fail and `pending` releases on drop.
        {
            let mut tasks = lock(&this.tasks);
            let mut capture = lock(&this.capture);
            let mut playback = lock(&this.playback);
            let mut connection = lock(&this.connection);

            let online = this.transition_when(
                SessionState::Connected,
                Some(status_text::ONLINE),
                || this.is_current(epoch),
            );
            if !online {
                return Err(SessionError::Cancelled);
            }

            *capture = pending.capture.take();
            *playback = pending.playback.take();
            *connection = pending.connection.take();

            let weak = Arc::downgrade(this);
            tasks.extend([
                tokio::spawn(run_uplink(weak.clone(), frames)),
                tokio::spawn(run_downlink(weak.clone(), events, epoch)),
                tokio::spawn(run_meter(weak, config.meter_interval)),
            ]);
        }

        info!("Voice session online: {}", config.session_id);
        Ok(())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn ensure_current(&self, epoch: u64) -> SessionResult<()> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    fn transition(&self, next: SessionState, message: Option<&str>) -> bool {
        self.transition_when(next, message, || true)
    }

    /// Apply a transition only if it is valid and `ready` agrees, atomically
    /// with respect to every other transition
    fn transition_when(
        &self,
        next: SessionState,
        message: Option<&str>,
        ready: impl FnOnce() -> bool,
    ) -> bool {
        let mut from = None;
        self.status.send_if_modified(|status| {
            if !status.state.can_transition_to(next) || !ready() {
                return false;
            }
            from = Some(status.state);
            status.state = next;
            if let Some(message) = message {
                status.message = message.to_string();
            }
            true
        });

        match from {
            Some(from) => {
                info!("Session {}: {} -> {}", self.config.session_id, from, next);
                true
            }
            None => {
                debug!(
                    "Session {}: ignoring transition to {}",
                    self.config.session_id, next
                );
                false
            }
        }
    }

    /// Surface a failure of the open identified by `epoch`, tear down and
    /// settle in `Closed`. Returns false, touching nothing, when that open
    /// was already torn down.
    fn fail_current(&self, epoch: u64, err: &SessionError) -> bool {
        let message = err.status_text();
        if !self.transition_when(SessionState::Error, Some(message), || self.is_current(epoch)) {
            return false;
        }
        self.release();
        self.transition(SessionState::Closed, Some(message));
        true
    }

    /// Remote close of the open identified by `epoch`
    fn finish_current(&self, epoch: u64, message: &str) -> bool {
        if self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.teardown();
        self.transition(SessionState::Closed, Some(message));
        true
    }

    fn finish(&self, message: &str) {
        let state = self.status.borrow().state;
        if state.is_active() {
            info!("Closing voice session: {}", self.config.session_id);
        }
        self.release();
        self.transition(SessionState::Closed, Some(message));
    }

    /// Invalidate the current open and release what it installed
    fn release(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.teardown();
    }

    /// Single teardown path. Safe to run any number of times.
    fn teardown(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.abort();
        }

        if let Some(mut capture) = lock(&self.capture).take() {
            if let Err(e) = capture.stop() {
                warn!("Failed to stop capture: {}", e);
            }
        }

        {
            let mut playback = lock(&self.playback);
            if let Some(mut scheduler) = playback.take() {
                scheduler.close();
            }
            self.volume.send_if_modified(|level| {
                let changed = *level != 0.0;
                *level = 0.0;
                changed
            });
        }

        if let Some(connection) = lock(&self.connection).take() {
            if let Err(e) = connection.close() {
                warn!("Ignoring error while closing live connection: {}", e);
            }
        }
    }

    fn send_captured_audio(&self, frame: AudioFrame) -> bool {
        if self.muted.load(Ordering::SeqCst) {
            Counters::bump(&self.counters.frames_muted);
            return false;
        }

        let frame = convert::process_frame(frame, self.config.input_sample_rate, 1);
        let blob = pcm::create_pcm_blob(&frame);

        let connection = lock(&self.connection);
        let Some(connection) = connection.as_ref() else {
            return false;
        };

        match connection.send_audio(blob) {
            Ok(()) => {
                Counters::bump(&self.counters.frames_sent);
                true
            }
            Err(e) => {
                Counters::bump(&self.counters.frames_dropped);
                warn!("Dropping captured frame: {}", e);
                false
            }
        }
    }

    fn on_remote_audio(&self, blob: &PcmBlob) -> Option<ScheduledFrame> {
        let samples = match pcm::decode_base64_audio(&blob.data) {
            Ok(samples) => samples,
            Err(e) => {
                Counters::bump(&self.counters.frames_rejected);
                warn!("Discarding undecodable audio chunk: {}", e);
                return None;
            }
        };
        let frame = InboundFrame {
            samples,
            sample_rate: pcm::rate_from_mime(&blob.mime_type)
                .unwrap_or(self.config.output_sample_rate),
        };

        let scheduled = lock(&self.playback).as_mut()?.schedule(frame)?;

        Counters::bump(&self.counters.frames_received);
        let length = scheduled.end.saturating_sub(scheduled.start);
        self.counters
            .scheduled_audio_us
            .fetch_add(length.as_micros() as u64, Ordering::Relaxed);

        Some(scheduled)
    }

    fn on_interruption(&self) -> usize {
        let Some(stopped) = lock(&self.playback).as_mut().map(PlaybackScheduler::interrupt) else {
            return 0;
        };
        Counters::bump(&self.counters.interruptions);
        stopped
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Publish the level of what the output pipeline just rendered
    ///
    /// Runs under the playback lock so a tick racing with teardown cannot
    /// publish a level after it was reset.
    fn publish_level(&self, analyser: &mut Analyser) {
        let playback = lock(&self.playback);

        // Read the state every tick; a stale "connected" would keep the
        // visualizer moving after disconnect.
        let level = match playback.as_ref() {
            Some(playback) if self.state() == SessionState::Connected => {
                let mut window = [0.0f32; FFT_SIZE];
                playback.sink().recent_samples(&mut window);
                analyser.level(&window)
            }
            _ => {
                analyser.reset();
                0.0
            }
        };

        self.volume.send_if_modified(|current| {
            let changed = *current != level;
            *current = level;
            changed
        });
    }
}

async fn run_uplink(session: Weak<Inner>, mut frames: mpsc::Receiver<AudioFrame>) {
    debug!("Uplink task started");

    while let Some(frame) = frames.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.send_captured_audio(frame);
    }

    debug!("Uplink task stopped");
}

async fn run_downlink(
    session: Weak<Inner>,
    mut events: mpsc::Receiver<LiveEvent>,
    epoch: u64,
) {
    debug!("Downlink task started");

    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };

        match event {
            LiveEvent::Audio(blob) => {
                inner.on_remote_audio(&blob);
            }
            LiveEvent::Interrupted => {
                inner.on_interruption();
            }
            LiveEvent::SetupComplete => debug!("Duplicate setup acknowledgement"),
            LiveEvent::TurnComplete => debug!("Model turn complete"),
            LiveEvent::GoAway { time_left } => {
                warn!(
                    "Endpoint will disconnect soon (time left: {})",
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            LiveEvent::Closed { reason } => {
                info!(
                    "Live connection closed by endpoint: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                inner.finish_current(epoch, status_text::CLOSED);
                break;
            }
            LiveEvent::Error(e) => {
                error!("Live connection failed: {}", e);
                inner.fail_current(epoch, &SessionError::Transport(e));
                break;
            }
        }
    }

    debug!("Downlink task stopped");
}

async fn run_meter(session: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut analyser = Analyser::new();

    loop {
        ticker.tick().await;
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.publish_level(&mut analyser);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioOutput, AudioSource, HostAudio, OutputTarget};
    use crate::live::LiveChannel;

    struct RefusingConnector;

    #[async_trait::async_trait]
    impl LiveConnector for RefusingConnector {
        async fn connect(&self, _setup: &LiveSetup) -> SessionResult<LiveChannel> {
            Err(SessionError::Transport("unreachable".to_string()))
        }
    }

    fn session(api_key: Option<&str>, input: AudioSource) -> RealtimeVoiceSession {
        let config = SessionConfig {
            api_key: api_key.map(str::to_string),
            ..Default::default()
        };
        RealtimeVoiceSession::new(
            config,
            Arc::new(RefusingConnector),
            Arc::new(HostAudio::new(input, AudioOutput::Paced(OutputTarget::Null))),
        )
    }

    #[tokio::test]
    async fn test_missing_key_closes_without_touching_audio() {
        let session = session(None, AudioSource::None);

        let err = session.open().await.unwrap_err();

        assert_eq!(err, SessionError::MissingCredential);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.status().message, "Error: Missing API Key");
        assert!(!session.holds_resources());
    }

    #[tokio::test]
    async fn test_no_capture_device_is_permission_denied() {
        let session = session(Some("key"), AudioSource::None);

        let err = session.open().await.unwrap_err();

        assert!(matches!(err, SessionError::PermissionDenied(_)));
        assert_eq!(session.status().message, "Error: Microphone Access Denied");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_close_before_open_is_harmless() {
        let session = session(None, AudioSource::None);
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_remote_audio_without_playback_is_ignored() {
        let session = session(None, AudioSource::None);
        let blob = PcmBlob {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: "AAAA".to_string(),
        };
        assert!(session.on_remote_audio(&blob).is_none());
        assert_eq!(session.on_interruption(), 0);
    }
}
