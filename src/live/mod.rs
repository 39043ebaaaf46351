//! Remote conversational endpoint
//!
//! `LiveConnector` opens a bidirectional session and waits for the endpoint
//! to acknowledge it. The resulting `LiveConnection` carries outbound audio;
//! everything the endpoint sends back arrives as `LiveEvent`s on a channel.

pub mod client;
pub mod messages;

use tokio::sync::mpsc;

use crate::audio::PcmBlob;
use crate::error::SessionResult;

pub use client::GeminiLiveConnector;
pub use messages::{ClientMessage, LiveEvent, ServerMessage, Setup};

/// Parameters of one live session
#[derive(Debug, Clone)]
pub struct LiveSetup {
    /// WebSocket endpoint, without the key query parameter
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// An open, acknowledged session
pub struct LiveChannel {
    pub connection: Box<dyn LiveConnection>,
    pub events: mpsc::Receiver<LiveEvent>,
}

#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect, send the setup message and wait for the acknowledgement
    async fn connect(&self, setup: &LiveSetup) -> SessionResult<LiveChannel>;
}

pub trait LiveConnection: Send + Sync {
    /// Queue a chunk of microphone audio. Never waits on the network.
    fn send_audio(&self, blob: PcmBlob) -> SessionResult<()>;

    /// Close the connection. No events are delivered afterwards.
    fn close(&self) -> SessionResult<()>;

    fn is_open(&self) -> bool;
}
