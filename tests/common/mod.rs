// Shared fakes for integration tests: a scripted live endpoint, a capture
// backend fed from the test, and an output pipeline with a hand-driven clock.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prombot::audio::pcm::create_pcm_blob;
use prombot::audio::{
    AudioBackend, AudioBackendConfig, AudioFrame, AudioPlatform, PcmBlob, PlaybackSink, VoiceId,
};
use prombot::live::{LiveChannel, LiveConnection, LiveConnector, LiveEvent, LiveSetup};
use prombot::{RealtimeVoiceSession, SessionConfig, SessionError, SessionResult};
use tokio::sync::{mpsc, Notify};

// ============================================================================
// Live endpoint
// ============================================================================

/// Server side of one fake connection
#[derive(Default)]
pub struct FakeLink {
    pub sent: Mutex<Vec<PcmBlob>>,
    pub closed: AtomicBool,
    pub fail_close: AtomicBool,
    events: Mutex<Option<mpsc::Sender<LiveEvent>>>,
}

impl FakeLink {
    /// Deliver an event to the session as if the endpoint sent it
    pub async fn emit(&self, event: LiveEvent) {
        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeConnection(Arc<FakeLink>);

impl LiveConnection for FakeConnection {
    fn send_audio(&self, blob: PcmBlob) -> SessionResult<()> {
        if self.0.is_closed() {
            return Err(SessionError::Transport("connection closed".to_string()));
        }
        self.0.sent.lock().unwrap().push(blob);
        Ok(())
    }

    fn close(&self) -> SessionResult<()> {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.events.lock().unwrap().take();
        if self.0.fail_close.load(Ordering::SeqCst) {
            return Err(SessionError::Close("socket already reset".to_string()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.0.is_closed()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub setups: Mutex<Vec<LiveSetup>>,
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub fail_with: Mutex<Option<SessionError>>,
    pub fail_close: AtomicBool,
    /// Holds the next connect open until notified
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeConnector {
    /// Make the next `connect` wait until the returned handle is notified
    pub fn hold_next_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn connects(&self) -> usize {
        self.setups.lock().unwrap().len()
    }

    /// Most recent connection
    pub fn link(&self) -> Arc<FakeLink> {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection was made")
    }
}

#[async_trait::async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, setup: &LiveSetup) -> SessionResult<LiveChannel> {
        self.setups.lock().unwrap().push(setup.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(64);
        let link = Arc::new(FakeLink {
            events: Mutex::new(Some(tx)),
            fail_close: AtomicBool::new(self.fail_close.load(Ordering::SeqCst)),
            ..Default::default()
        });
        self.links.lock().unwrap().push(Arc::clone(&link));

        Ok(LiveChannel {
            connection: Box::new(FakeConnection(link)),
            events: rx,
        })
    }
}

// ============================================================================
// Audio platform
// ============================================================================

/// Output pipeline whose clock only moves when the test says so
#[derive(Default)]
pub struct ManualSink {
    now: Mutex<Duration>,
    pub started: Mutex<Vec<(VoiceId, usize, Duration)>>,
    pub stopped: Mutex<Vec<VoiceId>>,
    pub closed: AtomicBool,
    /// Report a loud tone from `recent_samples`
    pub loud: AtomicBool,
}

impl ManualSink {
    pub fn set_now(&self, now: Duration) {
        *self.now.lock().unwrap() = now;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for ManualSink {
    fn current_time(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sample_rate(&self) -> u32 {
        24000
    }

    fn start(&self, id: VoiceId, samples: Arc<[f32]>, at: Duration) {
        self.started.lock().unwrap().push((id, samples.len(), at));
    }

    fn stop(&self, id: VoiceId) {
        self.stopped.lock().unwrap().push(id);
    }

    fn recent_samples(&self, out: &mut [f32]) {
        if self.loud.load(Ordering::SeqCst) {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample = 0.5 * (2.0 * std::f32::consts::PI * 4.0 * i as f32 / 32.0).sin();
            }
        } else {
            out.fill(0.0);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Capture backend whose frames are pushed by the test through `FakePlatform::mic`
struct ChannelBackend {
    mic: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    /// This backend's end of `mic`, so stopping it leaves a newer capture alone
    own: Option<mpsc::Sender<AudioFrame>>,
    capturing: bool,
    stops: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl AudioBackend for ChannelBackend {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(16);
        *self.mic.lock().unwrap() = Some(tx.clone());
        self.own = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    fn stop(&mut self) -> SessionResult<()> {
        if self.capturing {
            self.capturing = false;
            let own = self.own.take();
            let mut mic = self.mic.lock().unwrap();
            let ours = match (&own, mic.as_ref()) {
                (Some(own), Some(current)) => own.same_channel(current),
                _ => false,
            };
            if ours {
                mic.take();
            }
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "test microphone"
    }
}

#[derive(Default)]
pub struct FakePlatform {
    pub deny_microphone: AtomicBool,
    pub mic: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    pub sink: Arc<ManualSink>,
    pub captures_opened: AtomicUsize,
    pub captures_stopped: Arc<AtomicUsize>,
    pub capture_rates: Mutex<Vec<u32>>,
    pub playback_rates: Mutex<Vec<u32>>,
}

impl FakePlatform {
    /// Push a frame into the running capture, as the microphone would
    pub async fn speak(&self, frame: AudioFrame) -> bool {
        let tx = self.mic.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }
}

impl AudioPlatform for FakePlatform {
    fn open_capture(&self, config: AudioBackendConfig) -> SessionResult<Box<dyn AudioBackend>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(SessionError::PermissionDenied("user declined".to_string()));
        }
        self.captures_opened.fetch_add(1, Ordering::SeqCst);
        self.capture_rates.lock().unwrap().push(config.sample_rate);
        Ok(Box::new(ChannelBackend {
            mic: Arc::clone(&self.mic),
            own: None,
            capturing: false,
            stops: Arc::clone(&self.captures_stopped),
        }))
    }

    fn open_playback(&self, sample_rate: u32) -> SessionResult<Arc<dyn PlaybackSink>> {
        self.playback_rates.lock().unwrap().push(sample_rate);
        self.sink.closed.store(false, Ordering::SeqCst);
        Ok(self.sink.clone())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn test_config(api_key: Option<&str>) -> SessionConfig {
    SessionConfig {
        api_key: api_key.map(str::to_string),
        meter_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn new_session(
    api_key: Option<&str>,
) -> (RealtimeVoiceSession, Arc<FakeConnector>, Arc<FakePlatform>) {
    let connector = Arc::new(FakeConnector::default());
    let platform = Arc::new(FakePlatform::default());
    let session = RealtimeVoiceSession::new(
        test_config(api_key),
        connector.clone(),
        platform.clone(),
    );
    (session, connector, platform)
}

/// Synthesized speech chunk of the given length at 24kHz
pub fn speech(secs: f64) -> PcmBlob {
    let frame = AudioFrame {
        samples: vec![1000; (24000.0 * secs) as usize],
        sample_rate: 24000,
        channels: 1,
        timestamp_ms: 0,
    };
    create_pcm_blob(&frame)
}

/// One microphone buffer at 16kHz
pub fn mic_frame() -> AudioFrame {
    AudioFrame {
        samples: vec![200; 4096],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
