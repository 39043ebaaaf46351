// Host microphone and speaker through cpal
//
// cpal streams cannot move between threads, so each stream lives on its own
// thread for its whole life and is dropped there when asked to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert;
use super::playback::{PlaybackSink, VoiceId};
use super::timeline::Timeline;
use crate::error::{SessionError, SessionResult};

/// Owns a cpal stream on a dedicated thread
struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> SessionResult<Self>
    where
        F: FnOnce() -> SessionResult<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<SessionResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SessionError::Audio(format!("failed to start stream: {}", e))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stopped or the owner goes away
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SessionError::Audio(format!("failed to spawn audio thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| SessionError::Audio("audio thread exited during setup".to_string()))??;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Host default microphone
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stream: Option<StreamThread>,
    capturing: Arc<AtomicBool>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> SessionResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SessionError::PermissionDenied("no capture device found".to_string()))?;

        info!(
            "Microphone backend initialized: {} ({}Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate,
            config.channels
        );

        Ok(Self {
            config,
            stream: None,
            capturing: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::Audio("already capturing".to_string()));
        }

        let (tx, rx) = mpsc::channel(100);
        let target = self.config.clone();
        let capturing = Arc::clone(&self.capturing);

        self.capturing.store(true, Ordering::SeqCst);
        let stream = StreamThread::spawn("prombot-mic", move || {
            build_input_stream(target, tx, capturing)
        })
        .inspect_err(|_| self.capturing.store(false, Ordering::SeqCst))?;

        self.stream = Some(stream);
        info!("Microphone capture started");

        Ok(rx)
    }

    fn stop(&mut self) -> SessionResult<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn build_input_stream(
    target: AudioBackendConfig,
    tx: mpsc::Sender<AudioFrame>,
    capturing: Arc<AtomicBool>,
) -> SessionResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SessionError::PermissionDenied("no capture device found".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let device_rate = stream_config.sample_rate.0;
    let device_channels = stream_config.channels;
    let started = Instant::now();
    let mut pending: Vec<i16> = Vec::with_capacity(target.buffer_size * 2);

    let mut on_samples = move |samples: Vec<i16>| {
        if !capturing.load(Ordering::SeqCst) {
            return;
        }
        let frame = AudioFrame {
            samples,
            sample_rate: device_rate,
            channels: device_channels,
            timestamp_ms: started.elapsed().as_millis() as u64,
        };
        let frame = convert::process_frame(frame, target.sample_rate, target.channels);
        pending.extend_from_slice(&frame.samples);

        while pending.len() >= target.buffer_size {
            let chunk: Vec<i16> = pending.drain(..target.buffer_size).collect();
            let out = AudioFrame {
                samples: chunk,
                sample_rate: target.sample_rate,
                channels: target.channels,
                timestamp_ms: frame.timestamp_ms,
            };
            // Never block the device callback
            if tx.try_send(out).is_err() {
                warn!("Dropping microphone frame: consumer not keeping up");
            }
        }
    };

    let on_error = |e: cpal::StreamError| error!("Microphone stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_samples(convert::f32_to_i16(data)),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| on_samples(data.to_vec()),
            on_error,
            None,
        ),
        other => {
            return Err(SessionError::Audio(format!(
                "unsupported microphone sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| SessionError::PermissionDenied(e.to_string()))
}

/// Host default speaker driving a `Timeline`
pub struct SpeakerSink {
    timeline: Arc<Timeline>,
    stream: std::sync::Mutex<Option<StreamThread>>,
}

impl SpeakerSink {
    pub fn open() -> SessionResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SessionError::Audio("no output device found".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| SessionError::Audio(e.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(SessionError::Audio(format!(
                "unsupported speaker sample format: {:?}",
                supported.sample_format()
            )));
        }
        let stream_config: cpal::StreamConfig = supported.into();

        // The timeline runs at the device rate; inbound speech is resampled
        // by the scheduler.
        let timeline = Arc::new(Timeline::new(stream_config.sample_rate.0));
        let render_timeline = Arc::clone(&timeline);
        let channels = stream_config.channels as usize;

        let stream = StreamThread::spawn("prombot-speaker", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| SessionError::Audio("no output device found".to_string()))?;
            let mut mono: Vec<f32> = Vec::new();
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mono.resize(data.len() / channels, 0.0);
                        render_timeline.render(&mut mono);
                        for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                            frame.fill(sample);
                        }
                    },
                    |e| error!("Speaker stream error: {}", e),
                    Some(Duration::from_millis(200)),
                )
                .map_err(|e| SessionError::Audio(e.to_string()))
        })?;

        info!("Speaker output started at {}Hz", timeline.sample_rate());

        Ok(Self {
            timeline,
            stream: std::sync::Mutex::new(Some(stream)),
        })
    }
}

impl PlaybackSink for SpeakerSink {
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
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut stream) = stream {
            stream.stop();
            info!("Speaker output stopped");
        }
    }
}
