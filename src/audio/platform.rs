use std::sync::Arc;

use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioSource};
use super::playback::PlaybackSink;
use super::timeline::{OutputTarget, PacedSink};
use crate::error::{SessionError, SessionResult};

/// Opens the two audio pipelines a session needs
pub trait AudioPlatform: Send + Sync {
    /// Acquire the capture device
    ///
    /// Fails with `PermissionDenied` when access is refused or no device exists.
    fn open_capture(&self, config: AudioBackendConfig) -> SessionResult<Box<dyn AudioBackend>>;

    /// Create the output pipeline. `sample_rate` is the preferred render rate;
    /// hardware sinks may run at their own rate.
    fn open_playback(&self, sample_rate: u32) -> SessionResult<Arc<dyn PlaybackSink>>;
}

/// Where synthesized speech is rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutput {
    /// Host default speaker (`device` feature)
    Speaker,
    /// Software timeline paced in real time
    Paced(OutputTarget),
}

/// Platform built from configured input and output choices
#[derive(Debug, Clone)]
pub struct HostAudio {
    pub input: AudioSource,
    pub output: AudioOutput,
}

impl HostAudio {
    pub fn new(input: AudioSource, output: AudioOutput) -> Self {
        Self { input, output }
    }
}

impl AudioPlatform for HostAudio {
    fn open_capture(&self, config: AudioBackendConfig) -> SessionResult<Box<dyn AudioBackend>> {
        let backend = AudioBackendFactory::create(&self.input, config)?;
        info!("Capture pipeline: {}", backend.name());
        Ok(backend)
    }

    fn open_playback(&self, sample_rate: u32) -> SessionResult<Arc<dyn PlaybackSink>> {
        match &self.output {
            AudioOutput::Speaker => {
                #[cfg(feature = "device")]
                {
                    let _ = sample_rate;
                    let sink = super::device::SpeakerSink::open()?;
                    Ok(Arc::new(sink))
                }

                #[cfg(not(feature = "device"))]
                {
                    let _ = sample_rate;
                    Err(SessionError::Audio(
                        "speaker output requires the `device` feature".to_string(),
                    ))
                }
            }

            AudioOutput::Paced(target) => {
                let sink = PacedSink::spawn(sample_rate, target.clone())
                    .map_err(|e| SessionError::Audio(format!("{:#}", e)))?;
                Ok(Arc::new(sink))
            }
        }
    }
}
