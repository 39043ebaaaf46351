//! Software output pipeline.
//!
//! `Timeline` mixes scheduled buffers against a sample clock that only
//! advances as audio is rendered. Something has to pull samples out of it:
//! the host speaker callback (`device` feature) or the real-time pacer below,
//! which either discards the audio or records it to a WAV file.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::playback::{PlaybackSink, VoiceId};

/// Rendered samples kept for the level meter
const HISTORY_LEN: usize = 256;

/// Render granularity of the pacer
const PACER_TICK: Duration = Duration::from_millis(20);

struct Voice {
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct TimelineState {
    rendered: u64,
    voices: BTreeMap<VoiceId, Voice>,
    history: VecDeque<f32>,
    gain: f32,
    closed: bool,
}

/// Mono mixing timeline with a sample clock
pub struct Timeline {
    sample_rate: u32,
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Mutex::new(TimelineState {
                rendered: 0,
                voices: BTreeMap::new(),
                history: VecDeque::with_capacity(HISTORY_LEN),
                gain: 1.0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Output gain applied to the mix
    pub fn set_gain(&self, gain: f32) {
        self.lock().gain = gain.max(0.0);
    }

    /// Buffers not yet fully rendered
    pub fn active_voices(&self) -> usize {
        self.lock().voices.len()
    }

    /// Frames rendered so far
    pub fn rendered_frames(&self) -> u64 {
        self.lock().rendered
    }

    /// Render the next `out.len()` samples and advance the clock
    pub fn render(&self, out: &mut [f32]) {
        let mut state = self.lock();
        out.fill(0.0);

        let begin = state.rendered;
        let end = begin + out.len() as u64;

        if !state.closed {
            for voice in state.voices.values() {
                let from = voice.start_frame.max(begin);
                let to = voice.end_frame().min(end);
                for frame in from..to {
                    let src = (frame - voice.start_frame) as usize;
                    let dst = (frame - begin) as usize;
                    out[dst] += voice.samples[src];
                }
            }

            let gain = state.gain;
            for sample in out.iter_mut() {
                *sample = (*sample * gain).clamp(-1.0, 1.0);
            }
        }

        state.rendered = end;
        state.voices.retain(|_, voice| voice.end_frame() > end);

        for &sample in out.iter() {
            if state.history.len() == HISTORY_LEN {
                state.history.pop_front();
            }
            state.history.push_back(sample);
        }
    }

    fn frame_at(&self, at: Duration) -> u64 {
        (at.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

impl PlaybackSink for Timeline {
    fn current_time(&self) -> Duration {
        let rendered = self.lock().rendered as u128;
        Duration::from_nanos((rendered * 1_000_000_000 / self.sample_rate.max(1) as u128) as u64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, id: VoiceId, samples: Arc<[f32]>, at: Duration) {
        let start_frame = self.frame_at(at);
        let mut state = self.lock();
        if state.closed {
            return;
        }
        // A start time already in the past plays from now
        let start_frame = start_frame.max(state.rendered);
        state.voices.insert(id, Voice { start_frame, samples });
    }

    fn stop(&self, id: VoiceId) {
        self.lock().voices.remove(&id);
    }

    fn recent_samples(&self, out: &mut [f32]) {
        let state = self.lock();
        out.fill(0.0);
        let take = out.len().min(state.history.len());
        let skip = state.history.len() - take;
        let offset = out.len() - take;
        for (dst, &sample) in out[offset..].iter_mut().zip(state.history.iter().skip(skip)) {
            *dst = sample;
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        state.voices.clear();
        state.closed = true;
    }
}

/// Where paced output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Render and discard
    Null,
    /// Record the rendered output to a 16-bit WAV file
    Wav(PathBuf),
}

/// Timeline driven in real time by a background task
pub struct PacedSink {
    timeline: Arc<Timeline>,
    running: Arc<AtomicBool>,
    pacer: Mutex<Option<JoinHandle<()>>>,
}

impl PacedSink {
    /// Create the timeline and start pacing it. Must run inside a tokio runtime.
    pub fn spawn(sample_rate: u32, target: OutputTarget) -> Result<Self> {
        let timeline = Arc::new(Timeline::new(sample_rate));
        let running = Arc::new(AtomicBool::new(true));

        let writer = match &target {
            OutputTarget::Null => None,
            OutputTarget::Wav(path) => Some(create_wav(path, sample_rate)?),
        };

        info!("Starting paced output at {}Hz ({:?})", sample_rate, target);

        let pacer = tokio::spawn(run_pacer(Arc::clone(&timeline), Arc::clone(&running), writer));

        Ok(Self {
            timeline,
            running,
            pacer: Mutex::new(Some(pacer)),
        })
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }
}

impl PlaybackSink for PacedSink {
    fn current_time(&self) -> Duration {
        self.timeline.current_time()
    }

    fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate()
    }

    fn start(&self, id: VoiceId, samples: Arc<[f32]>, at: Duration) {
        self.timeline.start(id, samples, at);
    }

    fn stop(&self, id: VoiceId) {
        self.timeline.stop(id);
    }

    fn recent_samples(&self, out: &mut [f32]) {
        self.timeline.recent_samples(out);
    }

    fn close(&self) {
        self.timeline.close();
        self.running.store(false, Ordering::SeqCst);
        // The pacer sees `running == false` on its next tick and finalizes
        // the recording itself.
        let handle = self
            .pacer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if handle.is_some() {
            debug!("Paced output released");
        }
    }
}

impl Drop for PacedSink {
    fn drop(&mut self) {
        self.close();
    }
}

type WavOut = hound::WavWriter<BufWriter<File>>;

fn create_wav(path: &Path, sample_rate: u32) -> Result<WavOut> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))
}

async fn run_pacer(timeline: Arc<Timeline>, running: Arc<AtomicBool>, mut writer: Option<WavOut>) {
    let rate = timeline.sample_rate() as u64;
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(PACER_TICK);
    let mut buffer = Vec::new();

    while running.load(Ordering::SeqCst) {
        ticker.tick().await;

        // Render whatever the wall clock says is due, so ticks that fire
        // late do not make the output drift.
        let due = (started.elapsed().as_nanos() * rate as u128 / 1_000_000_000) as u64;
        let pending = due.saturating_sub(timeline.rendered_frames()) as usize;
        if pending == 0 {
            continue;
        }

        buffer.resize(pending, 0.0);
        timeline.render(&mut buffer);

        if let Some(wav) = writer.as_mut() {
            let result = buffer
                .iter()
                .try_for_each(|&s| wav.write_sample((s * i16::MAX as f32) as i16));
            if let Err(e) = result {
                error!("Failed to write output WAV, recording stopped: {}", e);
                writer = None;
            }
        }
    }

    if let Some(wav) = writer {
        if let Err(e) = wav.finalize() {
            warn!("Failed to finalize output WAV: {}", e);
        }
    }

    debug!("Pacer stopped");
}
