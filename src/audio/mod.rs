pub mod analyser;
pub mod backend;
pub mod convert;
pub mod file;
pub mod pcm;
pub mod platform;
pub mod playback;
pub mod timeline;

#[cfg(feature = "device")]
pub mod device;

pub use analyser::Analyser;
pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use file::{AudioFile, FileBackend};
pub use pcm::PcmBlob;
pub use platform::{AudioOutput, AudioPlatform, HostAudio};
pub use playback::{InboundFrame, PlaybackScheduler, PlaybackSink, ScheduledFrame, VoiceId};
pub use timeline::{OutputTarget, PacedSink, Timeline};
