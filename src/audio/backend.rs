use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::{SessionError, SessionResult};

/// Captured audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Playback length of the frame
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Configuration for the capture pipeline
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate delivered to the session (will resample if needed)
    pub sample_rate: u32,
    /// Channel count delivered to the session (1 = mono)
    pub channels: u16,
    /// Samples per delivered frame
    pub buffer_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Live endpoint expects 16kHz input
            channels: 1,        // Mono
            buffer_size: 4096,  // ~256ms per frame at 16kHz
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Host microphone through cpal (`device` feature)
/// - WAV file played back at real-time pace (headless runs and tests)
///
/// Frames are pushed from the capture side with `try_send`, so a slow
/// consumer drops frames instead of stalling the device callback.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device. Safe to call more than once.
    fn stop(&mut self) -> SessionResult<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(
        source: &AudioSource,
        config: AudioBackendConfig,
    ) -> SessionResult<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "device")]
                {
                    let backend = super::device::MicrophoneBackend::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device"))]
                {
                    let _ = config;
                    Err(SessionError::PermissionDenied(
                        "no capture device available (built without the `device` feature)"
                            .to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }

            AudioSource::None => Err(SessionError::PermissionDenied(
                "no capture device configured".to_string(),
            )),
        }
    }
}

/// Where captured audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Host microphone (`device` feature)
    Microphone,
    /// WAV file streamed as if it were a microphone
    File(PathBuf),
    /// No capture device at all
    None,
}
