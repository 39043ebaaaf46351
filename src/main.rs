use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use prombot::config::{InputKind, OutputKind};
use prombot::{create_router, AppState, Config, GeminiLiveConnector, RealtimeVoiceSession, VoiceWidget};
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "prombot")]
#[command(about = "PromBot voice assistant for the PromAutomat website")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to config/prombot.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the widget control API
    Serve {
        /// Address to bind (overrides service.http.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides service.http.port)
        #[arg(long)]
        port: Option<u16>,

        #[command(flatten)]
        audio: AudioArgs,
    },

    /// Open one voice session and talk until Ctrl-C
    Talk {
        /// Start with the microphone muted
        #[arg(long)]
        muted: bool,

        #[command(flatten)]
        audio: AudioArgs,
    },
}

#[derive(Args)]
struct AudioArgs {
    /// Stream this WAV file instead of the microphone
    #[arg(long)]
    input_wav: Option<PathBuf>,

    /// Record synthesized speech to this WAV file instead of the speaker
    #[arg(long)]
    output_wav: Option<PathBuf>,

    /// Use the host microphone and speaker (requires the `device` feature)
    #[arg(long)]
    device: bool,
}

impl AudioArgs {
    fn apply(&self, cfg: &mut Config) {
        if self.device {
            cfg.audio.input = InputKind::Microphone;
            cfg.audio.output = OutputKind::Speaker;
        }
        if let Some(path) = &self.input_wav {
            cfg.audio.input = InputKind::File;
            cfg.audio.input_path = Some(path.clone());
        }
        if let Some(path) = &self.output_wav {
            cfg.audio.output = OutputKind::Wav;
            cfg.audio.output_path = Some(path.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut cfg = Config::load(cli.config.as_deref())?;

    info!("PromBot v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve { bind, port, audio } => {
            audio.apply(&mut cfg);
            if let Some(bind) = bind {
                cfg.service.http.bind = bind;
            }
            if let Some(port) = port {
                cfg.service.http.port = port;
            }
            serve(cfg).await
        }
        Command::Talk { muted, audio } => {
            audio.apply(&mut cfg);
            talk(cfg, muted).await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let widget = VoiceWidget::new(
        cfg.session.to_session_config(),
        Arc::new(GeminiLiveConnector::new()),
        Arc::new(cfg.audio.platform()?),
    );
    let state = AppState::new(widget);
    let app = create_router(state.clone());

    let addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    state.widget.close();
    info!("Server stopped");
    Ok(())
}

async fn talk(cfg: Config, muted: bool) -> Result<()> {
    let session = RealtimeVoiceSession::new(
        cfg.session.to_session_config(),
        Arc::new(GeminiLiveConnector::new()),
        Arc::new(cfg.audio.platform()?),
    );
    session.set_muted(muted);

    let mut status = session.subscribe();
    let reporter = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            info!("[{}] {}", current.state, current.message);
        }
    });

    if let Err(e) = session.open().await {
        error!("{}", session.status().message);
        reporter.abort();
        return Err(e).context("Failed to open voice session");
    }

    info!("Talking to PromBot. Press Ctrl-C to stop.");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Stopping session");
            session.close();
        }
        _ = session.closed() => {
            warn!("Session ended: {}", session.status().message);
        }
    }

    let stats = session.stats();
    info!(
        "Session {}: {:.1}s, {} frames sent, {} muted, {} chunks received, {} interruptions",
        stats.session_id,
        stats.duration_secs,
        stats.frames_sent,
        stats.frames_muted,
        stats.frames_received,
        stats.interruptions
    );

    reporter.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
