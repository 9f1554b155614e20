//! seqcast - Main entry point
//!
//! Plays every regular file of a folder in lexical order, looping forever,
//! with a live filler source mixed underneath so the output never stops.
//! Reads operator commands (`next`, `prev`, `pause`, `play`, `help`) from
//! stdin, one per line.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use seqcast::audio::open_sink;
use seqcast::backend::native::NativeBackend;
use seqcast::backend::{CombiningStage, MediaBackend};
use seqcast::config::{SeqConfig, SinkKind};
use seqcast::session::{operator_message, SessionAdapter};
use seqcast_common::config::{find_config_file, resolve_playlist_folder, PLAYLIST_FOLDER_ENV};
use seqcast_common::events::{EventBus, SeqEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for seqcast
#[derive(Parser, Debug)]
#[command(name = "seqcast")]
#[command(about = "Continuous playlist playback with a never-silent output")]
#[command(version)]
struct Args {
    /// Folder whose regular files form the playlist
    #[arg(env = PLAYLIST_FOLDER_ENV)]
    playlist_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output sink: raw, null or device
    #[arg(short, long)]
    sink: Option<SinkKind>,

    /// File for the raw sink (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Filler volume, 0.0 to 1.0
    #[arg(long)]
    filler_volume: Option<f32>,
}

/// Where operator messages go; stderr when PCM is on stdout
#[derive(Clone, Copy)]
struct Console {
    to_stderr: bool,
}

impl Console {
    fn say(&self, message: &str) {
        if self.to_stderr {
            eprintln!("{}", message);
        } else {
            println!("{}", message);
        }
    }

    fn prompt(&self) {
        if self.to_stderr {
            eprint!("$ ");
            let _ = std::io::stderr().flush();
        } else {
            print!("$ ");
            let _ = std::io::stdout().flush();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout may carry PCM
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seqcast=info,seqcast_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let console = Console {
        to_stderr: config.output.sink == SinkKind::Raw && config.output.path.is_none(),
    };

    let folder = config
        .require_playlist_folder()
        .context("Usage: seqcast <PLAYLIST_FOLDER>")?;
    info!("Playlist folder: {}", folder.display());

    let sink = open_sink(&config.output).context("Failed to open output sink")?;
    let backend = Arc::new(
        NativeBackend::start(&config, sink).context("Failed to start native backend")?,
    );
    let events = Arc::new(EventBus::new(config.event_capacity));
    let printer = tokio::spawn(print_events(events.subscribe(), console));

    let adapter = SessionAdapter::new(
        config,
        Arc::clone(&backend) as Arc<dyn MediaBackend>,
        Arc::clone(&backend) as Arc<dyn CombiningStage>,
        Arc::clone(&events),
    );

    if let Err(e) = adapter.on_session_start() {
        console.say(&e.to_string());
        backend.shutdown();
        return Err(e).context("Failed to open session");
    }
    console.say("Session opened, type help to list commands");
    console.prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let reply = adapter.deliver_line(&line);
                    if let Some(text) = reply.text() {
                        console.say(text);
                    }
                    // Accepted commands are answered, and re-prompted, by the printer
                    if !reply.answered_by_event() {
                        console.prompt();
                    }
                }
                Ok(None) => {
                    // End of input stops reading only; playback goes on
                    debug!("stdin closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    adapter.on_session_end().await;
    console.say("Session closed");

    backend.shutdown();
    printer.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Config file, then environment, then command line
fn load_config(args: &Args) -> Result<SeqConfig> {
    let config_path = match &args.config {
        Some(path) => Some(path.clone()),
        None => find_config_file().ok(),
    };

    let mut config = match &config_path {
        Some(path) => SeqConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SeqConfig::default(),
    };

    let folder = resolve_playlist_folder(
        args.playlist_folder.as_deref(),
        PLAYLIST_FOLDER_ENV,
        config_path.as_deref(),
    )
    .context("Failed to resolve playlist folder")?;
    if folder.is_some() {
        config.playlist_folder = folder;
    }

    if let Some(sink) = args.sink {
        config.output.sink = sink;
    }
    if let Some(path) = &args.output {
        config.output.path = Some(path.clone());
        if args.sink.is_none() {
            config.output.sink = SinkKind::Raw;
        }
    }
    if let Some(volume) = args.filler_volume {
        config.filler.volume = volume;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Turn sequencer events into operator messages
async fn print_events(
    mut rx: tokio::sync::broadcast::Receiver<SeqEvent>,
    console: Console,
) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event printer lagged, {} events skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let Some(message) = operator_message(&event) {
            console.say(&message);
            console.prompt();
        }

        if let Ok(json) = serde_json::to_string(&event) {
            debug!("{}: {}", event.event_type(), json);
        }
    }
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
