use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert;
use crate::error::{SessionError, SessionResult};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Whole file converted to the given rate, mono
    pub fn to_mono(&self, sample_rate: u32) -> Vec<i16> {
        let frame = AudioFrame {
            samples: self.samples.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms: 0,
        };
        convert::process_frame(frame, sample_rate, 1).samples
    }
}

/// Streams a WAV file as if it were a live microphone
///
/// Frames of `buffer_size` samples are released at real-time pace; the
/// stream ends when the file does.
pub struct FileBackend {
    config: AudioBackendConfig,
    samples: Arc<Vec<i16>>,
    name: String,
    capturing: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> SessionResult<Self> {
        let path = path.as_ref();
        let audio = AudioFile::open(path).map_err(|e| {
            SessionError::PermissionDenied(format!("capture file {}: {:#}", path.display(), e))
        })?;

        Ok(Self {
            samples: Arc::new(audio.to_mono(config.sample_rate)),
            config,
            name: format!("WAV file {}", path.display()),
            capturing: Arc::new(AtomicBool::new(false)),
            feeder: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::Audio("already capturing".to_string()));
        }

        let (tx, rx) = mpsc::channel(100);
        let samples = Arc::clone(&self.samples);
        let capturing = Arc::clone(&self.capturing);
        let sample_rate = self.config.sample_rate;
        let buffer_size = self.config.buffer_size.max(1);
        let period = Duration::from_secs_f64(buffer_size as f64 / sample_rate.max(1) as f64);

        capturing.store(true, Ordering::SeqCst);
        info!("Starting file capture ({} samples at {}Hz)", samples.len(), sample_rate);

        self.feeder = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut timestamp_ms = 0u64;

            for chunk in samples.chunks(buffer_size) {
                ticker.tick().await;
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels: 1,
                    timestamp_ms,
                };
                timestamp_ms += period.as_millis() as u64;

                // Send to channel (non-blocking)
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Capture consumer is behind, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("File capture finished");
        }));

        Ok(rx)
    }

    fn stop(&mut self) -> SessionResult<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}
