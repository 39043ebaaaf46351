pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod widget;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioOutput,
    AudioPlatform, AudioSource, HostAudio, OutputTarget, PcmBlob, PlaybackScheduler, PlaybackSink,
};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use live::{GeminiLiveConnector, LiveConnection, LiveConnector, LiveEvent, LiveSetup};
pub use session::{RealtimeVoiceSession, SessionConfig, SessionState, SessionStats, SessionStatus};
pub use widget::{VoiceWidget, WidgetSnapshot};
