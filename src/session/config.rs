use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Live endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Kore";

/// Persona of the assistant
pub const PROMBOT_PERSONA: &str = "You are \"PromBot\", an industrial automation assistant for PromAutomat. \
You are professional, concise, and knowledgeable about PLCs (Siemens, Allen Bradley), SCADA, and Industrial IoT. \
Help users navigate the website, explain technical terms like Modbus, Profinet, and describe services like Technical Audits. \
Keep answers short and technical but accessible.";

/// Configuration for a realtime voice session
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Identifier used in logs and stats
    pub session_id: String,

    /// Credential for the live endpoint. `None` or blank fails `open()`
    /// before any connection is attempted.
    pub api_key: Option<String>,

    pub endpoint: String,

    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    pub system_instruction: String,

    /// Rate of audio sent to the endpoint
    pub input_sample_rate: u32,

    /// Rate of synthesized speech returned by the endpoint
    pub output_sample_rate: u32,

    /// Samples per captured frame
    pub capture_buffer_size: usize,

    /// Volume meter refresh period
    pub meter_interval: Duration,
}

impl SessionConfig {
    /// The configured credential, if it is non-blank
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("prombot-{}", uuid::Uuid::new_v4()),
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: PROMBOT_PERSONA.to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            capture_buffer_size: 4096,
            meter_interval: Duration::from_millis(16), // ~60 Hz
        }
    }
}

// Keeps the credential out of logs
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_id", &self.session_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("capture_buffer_size", &self.capture_buffer_size)
            .field("meter_interval", &self.meter_interval)
            .finish()
    }
}
