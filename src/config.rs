use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::audio::{AudioOutput, AudioSource, HostAudio, OutputTarget};
use crate::session::{SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};

/// Looked up when no file is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "config/prombot";

/// Plain environment variables accepted as the API key, in order
pub const CREDENTIAL_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub session: SessionSettings,
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Clone, Deserialize)]
pub struct SessionSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// Replaces the PromBot persona when set
    pub system_instruction: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_buffer_size: usize,
    pub meter_interval_ms: u64,
}

// api_key stays out of logs
impl std::fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Microphone,
    File,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Speaker,
    Null,
    Wav,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSettings {
    pub input: InputKind,
    /// WAV file streamed as microphone input when `input = "file"`
    pub input_path: Option<PathBuf>,
    pub output: OutputKind,
    /// Recording of synthesized speech when `output = "wav"`
    pub output_path: Option<PathBuf>,
}

impl Config {
    /// Load defaults, then the config file, then `PROMBOT__*` environment
    /// overrides. `API_KEY` / `GEMINI_API_KEY` fill in a missing key.
    ///
    /// Without an explicit path, `config/prombot.{toml,yaml,json}` is used
    /// when present.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::with_name(path),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let settings = Self::defaults()?
            .add_source(file)
            .add_source(config::Environment::with_prefix("PROMBOT").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.fill_credential(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let session = SessionConfig::default();

        Ok(config::Config::builder()
            .set_default("service.name", "prombot")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8080)?
            .set_default("session.endpoint", DEFAULT_ENDPOINT)?
            .set_default("session.model", DEFAULT_MODEL)?
            .set_default("session.voice", DEFAULT_VOICE)?
            .set_default("session.input_sample_rate", session.input_sample_rate as i64)?
            .set_default("session.output_sample_rate", session.output_sample_rate as i64)?
            .set_default("session.capture_buffer_size", session.capture_buffer_size as i64)?
            .set_default(
                "session.meter_interval_ms",
                session.meter_interval.as_millis() as i64,
            )?
            .set_default("audio.input", "microphone")?
            .set_default("audio.output", "speaker")?)
    }

    /// Take the API key from the first non-blank fallback variable if none is configured
    pub fn fill_credential(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let configured = self
            .session
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if configured {
            return;
        }

        self.session.api_key = CREDENTIAL_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|key| !key.trim().is_empty());
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();

        SessionConfig {
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self
                .system_instruction
                .clone()
                .unwrap_or(defaults.system_instruction),
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            capture_buffer_size: self.capture_buffer_size,
            meter_interval: Duration::from_millis(self.meter_interval_ms.max(1)),
            session_id: defaults.session_id,
        }
    }
}

impl AudioSettings {
    /// Build the capture and playback platform described by these settings
    pub fn platform(&self) -> Result<HostAudio> {
        let input = match self.input {
            InputKind::Microphone => AudioSource::Microphone,
            InputKind::None => AudioSource::None,
            InputKind::File => match &self.input_path {
                Some(path) => AudioSource::File(path.clone()),
                None => bail!("audio.input = \"file\" requires audio.input_path"),
            },
        };

        let output = match self.output {
            OutputKind::Speaker => AudioOutput::Speaker,
            OutputKind::Null => AudioOutput::Paced(OutputTarget::Null),
            OutputKind::Wav => match &self.output_path {
                Some(path) => AudioOutput::Paced(OutputTarget::Wav(path.clone())),
                None => bail!("audio.output = \"wav\" requires audio.output_path"),
            },
        };

        Ok(HostAudio::new(input, output))
    }
}
