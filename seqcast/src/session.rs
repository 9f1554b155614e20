//! Session adapter
//!
//! Bridges an operator session to the sequencer: opening a session builds the
//! catalog and spawns the control timeline, each input line becomes at most
//! one command, and closing the session shuts the sequencer down and waits
//! (bounded) for teardown to finish.

use crate::backend::{CombiningStage, MediaBackend};
use crate::config::SeqConfig;
use crate::error::{Error, Result};
use crate::playback::catalog::Catalog;
use crate::playback::events::{
    control_channel, Command, ControlEvent, ControlSender, SequencerSnapshot,
};
use crate::playback::reclaimer::Reclaimer;
use crate::playback::sequencer::Sequencer;
use seqcast_common::events::{EventBus, PlaybackState, SeqEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Command list printed for `help`
pub const HELP_TEXT: &str = "next: play next song\n\
                             prev: play previous song\n\
                             pause: stop playback\n\
                             play: resume playback";

pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command, type help to list available commands";

/// What became of one input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineReply {
    /// Command forwarded to the sequencer
    Accepted(Command),
    Help,
    Unknown,
    /// Blank line; ignored
    Empty,
    /// No session is open
    Inactive,
}

impl LineReply {
    /// Text to show the operator, if any
    pub fn text(&self) -> Option<&'static str> {
        match self {
            LineReply::Help => Some(HELP_TEXT),
            LineReply::Unknown => Some(UNKNOWN_COMMAND_TEXT),
            LineReply::Accepted(_) | LineReply::Empty | LineReply::Inactive => None,
        }
    }

    /// Whether the answer arrives later as a sequencer event
    ///
    /// Every accepted command emits exactly one event with an
    /// [`operator_message`], so the prompt belongs after that message.
    pub fn answered_by_event(&self) -> bool {
        matches!(self, LineReply::Accepted(_))
    }
}

/// Operator-facing text for a sequencer event, if it has one
pub fn operator_message(event: &SeqEvent) -> Option<String> {
    match event {
        SeqEvent::WillPlay { location, .. } => Some(format!("Will play back {}", location)),
        SeqEvent::AlreadyPaused { .. } => Some("Already paused".to_string()),
        SeqEvent::AlreadyPlaying { .. } => Some("Already playing".to_string()),
        SeqEvent::PlaybackStateChanged { new_state, .. } => Some(
            match new_state {
                PlaybackState::Paused => "Pausing",
                PlaybackState::Playing => "Resuming playback",
            }
            .to_string(),
        ),
        _ => None,
    }
}

/// Strip exactly one trailing line terminator
fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Cheap handle to a running session's control timeline
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: ControlSender,
}

impl SessionHandle {
    /// Forward `command`; false once the session has ended
    pub fn send(&self, command: Command) -> bool {
        self.control.send(ControlEvent::Command(command)).is_ok()
    }

    /// Current sequencer state, or `None` once the session has ended
    pub async fn snapshot(&self) -> Option<SequencerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.control.send(ControlEvent::Snapshot(tx)).ok()?;
        rx.await.ok()
    }
}

struct ActiveSession {
    handle: SessionHandle,
    task: JoinHandle<()>,
    reclaimer: Reclaimer,
}

pub struct SessionAdapter {
    config: SeqConfig,
    backend: Arc<dyn MediaBackend>,
    stage: Arc<dyn CombiningStage>,
    events: Arc<EventBus>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionAdapter {
    pub fn new(
        config: SeqConfig,
        backend: Arc<dyn MediaBackend>,
        stage: Arc<dyn CombiningStage>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            backend,
            stage,
            events,
            active: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn is_active(&self) -> bool {
        self.lock_active().is_some()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        // A panic while holding this lock leaves the Option intact
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a session: build the catalog and start playing
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `SessionActive` if a session is already open
    /// - `Config` if no playlist folder is configured
    /// - `Unreadable` / `EmptyDirectory` from the catalog
    /// - backend sanity check failures
    pub fn on_session_start(&self) -> Result<SessionHandle> {
        let mut active = self.lock_active();
        if active.is_some() {
            return Err(Error::SessionActive);
        }

        let folder = self.config.require_playlist_folder()?;
        self.backend.sanity_check()?;
        let catalog = Catalog::build(folder)?;

        let (control, rx) = control_channel();
        let reclaimer = Reclaimer::new(&self.config.reclaim, Arc::clone(&self.events));

        self.events.emit_lossy(SeqEvent::SessionStarted {
            folder: catalog.folder().display().to_string(),
            entries: catalog.len(),
            timestamp: chrono::Utc::now(),
        });

        let mut sequencer = Sequencer::new(
            catalog,
            Arc::clone(&self.backend),
            Arc::clone(&self.stage),
            reclaimer.clone(),
            Arc::clone(&self.events),
            control.clone(),
            &self.config,
        )?;
        sequencer.start();
        let task = tokio::spawn(sequencer.run(rx));

        let handle = SessionHandle { control };
        *active = Some(ActiveSession {
            handle: handle.clone(),
            task,
            reclaimer,
        });
        info!("Session opened");
        Ok(handle)
    }

    /// Interpret one operator line
    pub fn deliver_line(&self, line: &str) -> LineReply {
        let word = strip_line_ending(line);
        if word.is_empty() {
            return LineReply::Empty;
        }
        if word == "help" {
            return LineReply::Help;
        }
        let Some(command) = Command::parse(word) else {
            debug!("Unknown command {:?}", word);
            return LineReply::Unknown;
        };

        let active = self.lock_active();
        match active.as_ref() {
            Some(session) if session.handle.send(command) => LineReply::Accepted(command),
            _ => LineReply::Inactive,
        }
    }

    /// Current sequencer state of the open session
    pub async fn snapshot(&self) -> Option<SequencerSnapshot> {
        let handle = self.lock_active().as_ref().map(|s| s.handle.clone());
        handle?.snapshot().await
    }

    /// Close the session; no-op when none is open
    ///
    /// Waits up to `shutdown_timeout_ms` for teardown to finish.
    pub async fn on_session_end(&self) {
        let session = self.lock_active().take();
        let Some(session) = session else {
            return;
        };
        let timeout = self.config.shutdown_timeout();

        let (done_tx, done_rx) = oneshot::channel();
        if session.handle.control.send(ControlEvent::Shutdown(done_tx)).is_ok() {
            if tokio::time::timeout(timeout, done_rx).await.is_err() {
                warn!("Sequencer did not acknowledge shutdown within {:?}", timeout);
            }
        }
        match tokio::time::timeout(timeout, session.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Control task ended abnormally: {}", e),
            Err(_) => warn!("Control task still running after {:?}", timeout),
        }

        if tokio::time::timeout(timeout, session.reclaimer.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "{} teardown(s) still running after {:?}",
                session.reclaimer.in_flight(),
                timeout
            );
        }

        self.events.emit_lossy(SeqEvent::SessionEnded {
            timestamp: chrono::Utc::now(),
        });
        info!("Session closed");
    }
}
