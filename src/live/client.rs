use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, LiveEvent, ServerMessage, Setup};
use super::{LiveChannel, LiveConnection, LiveConnector, LiveSetup};
use crate::audio::PcmBlob;
use crate::error::{SessionError, SessionResult};

/// How long the endpoint gets to acknowledge the setup message
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Outbound messages waiting for the socket; capture drops frames beyond this
const OUTBOUND_QUEUE: usize = 64;

const EVENT_QUEUE: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the Gemini Live bidirectional streaming endpoint
#[derive(Debug, Clone, Default)]
pub struct GeminiLiveConnector;

impl GeminiLiveConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &LiveSetup) -> SessionResult<LiveChannel> {
        if setup.api_key.trim().is_empty() {
            return Err(SessionError::MissingCredential);
        }

        info!("Connecting to live endpoint {} (model {})", setup.endpoint, setup.model);

        let url = format!("{}?key={}", setup.endpoint, setup.api_key);
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Transport(format!("connect failed: {}", e)))?;

        let (mut sink, mut stream) = ws.split();

        let message = ClientMessage::Setup(Setup::audio(
            &setup.model,
            &setup.voice,
            &setup.system_instruction,
        ));
        let payload = serde_json::to_string(&message)
            .map_err(|e| SessionError::Transport(format!("failed to encode setup: {}", e)))?;

        sink.send(Message::Text(payload))
            .await
            .map_err(|e| SessionError::Transport(format!("failed to send setup: {}", e)))?;

        tokio::time::timeout(SETUP_TIMEOUT, await_setup_complete(&mut stream))
            .await
            .map_err(|_| {
                SessionError::Transport("timed out waiting for setup acknowledgement".to_string())
            })??;

        info!("Live session acknowledged by endpoint");

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_writer(sink, outbound_rx, Arc::clone(&open)));
        let reader = tokio::spawn(run_reader(stream, events_tx, Arc::clone(&open)));

        Ok(LiveChannel {
            connection: Box::new(GeminiLiveConnection {
                outbound: Mutex::new(Some(outbound_tx)),
                reader: Mutex::new(Some(reader)),
                open,
            }),
            events: events_rx,
        })
    }
}

enum Outbound {
    Text(String),
    Close,
}

/// Handle to an acknowledged Gemini Live session
pub struct GeminiLiveConnection {
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
}

impl LiveConnection for GeminiLiveConnection {
    fn send_audio(&self, blob: PcmBlob) -> SessionResult<()> {
        let outbound = self.outbound.lock().unwrap_or_else(|p| p.into_inner());
        let tx = outbound
            .as_ref()
            .ok_or_else(|| SessionError::Transport("connection closed".to_string()))?;

        let payload = serde_json::to_string(&ClientMessage::audio(blob))
            .map_err(|e| SessionError::Transport(format!("failed to encode audio: {}", e)))?;

        tx.try_send(Outbound::Text(payload)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SessionError::Transport("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SessionError::Transport("connection closed".to_string())
            }
        })
    }

    fn close(&self) -> SessionResult<()> {
        let tx = self.outbound.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(tx) = tx else {
            return Ok(());
        };

        // Stop delivering events right away; the writer drains and sends the
        // close frame on its own.
        if let Some(reader) = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
            reader.abort();
        }
        self.open.store(false, Ordering::SeqCst);

        tx.try_send(Outbound::Close)
            .map_err(|e| SessionError::Close(format!("writer unavailable: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for GeminiLiveConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Close on drop: {}", e);
        }
    }
}

enum Incoming {
    Message(ServerMessage),
    Close(Option<String>),
    Ignore,
}

fn decode_frame(message: Message) -> Incoming {
    let bytes = match &message {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(bytes) => bytes.as_slice(),
        Message::Close(frame) => {
            return Incoming::Close(frame.as_ref().map(|f| f.reason.to_string()))
        }
        _ => return Incoming::Ignore,
    };

    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(parsed) => Incoming::Message(parsed),
        Err(e) => {
            warn!("Failed to parse server message: {}", e);
            Incoming::Ignore
        }
    }
}

async fn await_setup_complete(stream: &mut SplitStream<WsStream>) -> SessionResult<()> {
    loop {
        match stream.next().await {
            Some(Ok(message)) => match decode_frame(message) {
                Incoming::Message(parsed) if parsed.setup_complete.is_some() => return Ok(()),
                Incoming::Message(_) => debug!("Ignoring message received before setup completed"),
                Incoming::Close(reason) => {
                    return Err(SessionError::Transport(format!(
                        "connection closed during setup: {}",
                        reason.unwrap_or_else(|| "no reason given".to_string())
                    )))
                }
                Incoming::Ignore => {}
            },
            Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
            None => {
                return Err(SessionError::Transport(
                    "connection ended before setup acknowledgement".to_string(),
                ))
            }
        }
    }
}

async fn run_reader(
    mut stream: SplitStream<WsStream>,
    events: mpsc::Sender<LiveEvent>,
    open: Arc<AtomicBool>,
) {
    debug!("Live reader started");

    let last = loop {
        match stream.next().await {
            Some(Ok(message)) => match decode_frame(message) {
                Incoming::Message(parsed) => {
                    for event in parsed.into_events() {
                        if events.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping reader");
                            open.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                }
                Incoming::Close(reason) => break LiveEvent::Closed { reason },
                Incoming::Ignore => {}
            },
            Some(Err(e)) => {
                error!("Live connection error: {}", e);
                break LiveEvent::Error(e.to_string());
            }
            None => break LiveEvent::Closed { reason: None },
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = events.send(last).await;
    debug!("Live reader stopped");
}

async fn run_writer(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Text(payload) => {
                if let Err(e) = sink.send(Message::Text(payload)).await {
                    warn!("Failed to send to live endpoint: {}", e);
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("Close frame not delivered: {}", e);
                }
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    if let Err(e) = sink.close().await {
        debug!("Socket close: {}", e);
    }
    debug!("Live writer stopped");
}
