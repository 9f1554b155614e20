//! Sequencer
//!
//! Owns the catalog cursor, the current item player, the mix bus and the
//! pending release queue, and drives them from [`ControlEvent`]s consumed one
//! at a time on the control timeline.
//!
//! # Hand-off
//! When the current item's completion notice arrives the sequencer
//! 1. advances the cursor, unless the item was stopped (a command already
//!    moved the cursor),
//! 2. unlinks the old item from the mix,
//! 3. releases it right away when playing, or queues it when paused,
//! 4. starts the item under the cursor.
//!
//! # Pause and resume
//! Pause blocks the item lane and records the output position; the filler
//! keeps the output alive. Resume adds the elapsed output time to the item
//! lane's cumulative offset before unblocking, so the items see no gap, then
//! drains the pending release queue in order.

use super::catalog::{Catalog, Cursor};
use super::events::{
    Command, ControlEvent, ControlReceiver, ControlSender, FinishedNotice, SequencerSnapshot,
};
use super::item_player::ItemPlayer;
use super::mix_bus::MixBus;
use super::reclaimer::Reclaimer;
use crate::backend::{CombiningStage, MediaBackend};
use crate::config::SeqConfig;
use crate::error::Result;
use seqcast_common::events::{EventBus, PlaybackState, SeqEvent};
use seqcast_common::Timestamp;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sequencer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Built, nothing started yet
    Idle,
    Playing,
    Paused,
    /// Shut down; further events are ignored
    Stopped,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::Playing => write!(f, "Playing"),
            SequencerState::Paused => write!(f, "Paused"),
            SequencerState::Stopped => write!(f, "Stopped"),
        }
    }
}

pub struct Sequencer {
    catalog: Catalog,
    cursor: Cursor,
    backend: Arc<dyn MediaBackend>,
    bus: MixBus,
    reclaimer: Reclaimer,
    events: Arc<EventBus>,
    control: ControlSender,
    state: SequencerState,
    current: Option<ItemPlayer>,
    pending: VecDeque<ItemPlayer>,
    position_at_pause: Timestamp,
    consecutive_faults: usize,
    retry_scheduled: bool,
    fault_backoff: Duration,
    drift_warning: Timestamp,
}

impl Sequencer {
    /// Build a sequencer over `catalog`; links the filler immediately
    pub fn new(
        catalog: Catalog,
        backend: Arc<dyn MediaBackend>,
        stage: Arc<dyn CombiningStage>,
        reclaimer: Reclaimer,
        events: Arc<EventBus>,
        control: ControlSender,
        config: &SeqConfig,
    ) -> Result<Self> {
        let bus = MixBus::new(stage, config.merge_slots)?;
        let cursor = catalog.first();

        Ok(Self {
            catalog,
            cursor,
            backend,
            bus,
            reclaimer,
            events,
            control,
            state: SequencerState::Idle,
            current: None,
            pending: VecDeque::new(),
            position_at_pause: Timestamp::ZERO,
            consecutive_faults: 0,
            retry_scheduled: false,
            fault_backoff: config.fault_backoff(),
            drift_warning: Timestamp::from_secs(config.drift_warning_secs),
        })
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_paused(&self) -> bool {
        self.state == SequencerState::Paused
    }

    /// Start playing the first catalog entry
    pub fn start(&mut self) {
        if self.state != SequencerState::Idle {
            warn!("Sequencer already started ({})", self.state);
            return;
        }
        self.state = SequencerState::Playing;
        info!(
            "Sequencer starting with {} entries from {}",
            self.catalog.len(),
            self.catalog.folder().display()
        );
        self.start_current();
    }

    /// Consume control events until shutdown
    pub async fn run(mut self, mut rx: ControlReceiver) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
            if self.state == SequencerState::Stopped {
                break;
            }
        }
        if self.state != SequencerState::Stopped {
            self.shutdown();
        }
        debug!("Control timeline finished");
    }

    /// Apply one control event
    pub fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Command(command) => self.handle_command(command),
            ControlEvent::ItemFinished(notice) => self.on_item_finished(notice),
            ControlEvent::RetryPlayback => self.on_retry(),
            ControlEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControlEvent::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        if !matches!(self.state, SequencerState::Playing | SequencerState::Paused) {
            warn!("Ignoring '{}' while {}", command, self.state);
            return;
        }
        match command {
            Command::Next => self.advance_to_next(),
            Command::Previous => self.retreat_to_previous(),
            Command::Pause => self.pause(),
            Command::Play => self.resume(),
        }
    }

    /// Move the cursor forward and stop the current item
    pub fn advance_to_next(&mut self) {
        self.cursor = self.catalog.advance(self.cursor);
        self.jump_to_cursor();
    }

    /// Move the cursor back and stop the current item
    pub fn retreat_to_previous(&mut self) {
        self.cursor = self.catalog.retreat(self.cursor);
        self.jump_to_cursor();
    }

    fn jump_to_cursor(&mut self) {
        let location = self.catalog.get(self.cursor).display_location();
        info!("Will play back {}", location);
        self.events.emit_lossy(SeqEvent::WillPlay {
            location,
            timestamp: chrono::Utc::now(),
        });

        // An explicit command clears any fault streak
        self.consecutive_faults = 0;

        match self.current.as_mut() {
            // The completion notice performs the hand-off
            Some(current) => current.stop(),
            None => self.start_current(),
        }
    }

    /// Block the item lane; the filler keeps flowing
    pub fn pause(&mut self) {
        if self.state == SequencerState::Paused {
            info!("Already paused");
            self.events.emit_lossy(SeqEvent::AlreadyPaused {
                timestamp: chrono::Utc::now(),
            });
            return;
        }

        self.bus.block();
        self.position_at_pause = self.bus.query_position();
        self.state = SequencerState::Paused;
        info!("Pausing at {}", self.position_at_pause);

        self.events.emit_lossy(SeqEvent::PlaybackStateChanged {
            old_state: PlaybackState::Playing,
            new_state: PlaybackState::Paused,
            offset_applied: Timestamp::ZERO,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Shift the item lane by the paused time, unblock, drain pending releases
    pub fn resume(&mut self) {
        if self.state != SequencerState::Paused {
            info!("Already playing");
            self.events.emit_lossy(SeqEvent::AlreadyPlaying {
                timestamp: chrono::Utc::now(),
            });
            return;
        }

        let now = self.bus.query_position();
        let delta = match now.checked_since(self.position_at_pause) {
            Some(delta) => delta,
            None => {
                warn!(
                    "Output position went backwards during pause ({} -> {}), applying no offset",
                    self.position_at_pause, now
                );
                Timestamp::ZERO
            }
        };
        if delta > self.drift_warning {
            warn!("Paused for {}; item timeline drift may be audible", delta);
        }

        let total = self.bus.apply_offset(delta);
        self.bus.unblock();
        self.state = SequencerState::Playing;
        info!("Resuming playback (offset +{}, total {})", delta, total);

        self.events.emit_lossy(SeqEvent::PlaybackStateChanged {
            old_state: PlaybackState::Paused,
            new_state: PlaybackState::Playing,
            offset_applied: delta,
            timestamp: chrono::Utc::now(),
        });

        self.drain_pending();

        if self.current.is_none() && !self.retry_scheduled {
            self.start_current();
        }
    }

    fn drain_pending(&mut self) {
        while let Some(mut player) = self.pending.pop_front() {
            player.detach(&mut self.bus);
            debug!("Releasing deferred item {}", player.id());
            self.events.emit_lossy(SeqEvent::PendingReleased {
                item_id: player.id(),
                timestamp: chrono::Utc::now(),
            });
            self.reclaimer.schedule(player);
        }
    }

    /// Hand-off after the current item's completion notice
    pub fn on_item_finished(&mut self, notice: FinishedNotice) {
        let is_current = self
            .current
            .as_ref()
            .map_or(false, |p| p.id() == notice.item_id);
        if !is_current || self.state == SequencerState::Stopped {
            debug!("Ignoring stale completion of {}", notice.item_id);
            return;
        }
        let Some(mut old) = self.current.take() else {
            return;
        };
        old.mark_finished();

        self.events.emit_lossy(SeqEvent::ItemFinished {
            item_id: old.id(),
            stopped: notice.stopped,
            timestamp: chrono::Utc::now(),
        });

        match &notice.fault {
            Some(message) => {
                self.consecutive_faults += 1;
                self.events.emit_lossy(SeqEvent::ItemFault {
                    item_id: old.id(),
                    message: message.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            None => self.consecutive_faults = 0,
        }

        // A stop request means a command already moved the cursor, even when
        // end of stream won the guard
        if !notice.stopped && !old.stop_requested() {
            self.cursor = self.catalog.advance(self.cursor);
        }

        old.unlink(&mut self.bus);
        if self.is_paused() {
            self.events.emit_lossy(SeqEvent::HandoffDeferred {
                item_id: old.id(),
                pending: self.pending.len() + 1,
                timestamp: chrono::Utc::now(),
            });
            debug!("Deferring release of {} until resume", old.id());
            self.pending.push_back(old);
        } else {
            old.detach(&mut self.bus);
            self.reclaimer.schedule(old);
        }

        if self.consecutive_faults >= self.catalog.len() {
            warn!(
                "All {} entries faulted in a row; retrying in {:?}",
                self.consecutive_faults, self.fault_backoff
            );
            self.schedule_retry();
        } else {
            self.start_current();
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_scheduled {
            return;
        }
        self.retry_scheduled = true;
        let control = self.control.clone();
        let delay = self.fault_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control.send(ControlEvent::RetryPlayback);
        });
    }

    fn on_retry(&mut self) {
        self.retry_scheduled = false;
        self.consecutive_faults = 0;
        if matches!(self.state, SequencerState::Playing | SequencerState::Paused) {
            self.start_current();
        }
    }

    /// Start the entry under the cursor unless an item is already current
    fn start_current(&mut self) {
        if self.current.is_some() {
            return;
        }
        if !self.bus.has_free_slot() {
            warn!(
                "All merge slots in use ({} pending releases); deferring start until resume",
                self.pending.len()
            );
            return;
        }

        let entry = self.catalog.get(self.cursor);
        let player = ItemPlayer::start(
            entry,
            Arc::clone(&self.backend),
            &mut self.bus,
            self.control.clone(),
        );

        if !player.guard().has_fired() {
            debug!("Playing {} as item {}", entry, player.id());
            self.events.emit_lossy(SeqEvent::ItemStarted {
                item_id: player.id(),
                location: entry.display_location(),
                timestamp: chrono::Utc::now(),
            });
        }
        self.current = Some(player);
    }

    /// Stop everything and hand all items to the reclaimer
    pub fn shutdown(&mut self) {
        if self.state == SequencerState::Stopped {
            return;
        }
        info!("Sequencer shutting down");
        self.state = SequencerState::Stopped;

        if let Some(mut current) = self.current.take() {
            current.stop();
            current.unlink(&mut self.bus);
            current.detach(&mut self.bus);
            self.reclaimer.schedule(current);
        }
        while let Some(mut player) = self.pending.pop_front() {
            player.detach(&mut self.bus);
            self.reclaimer.schedule(player);
        }
        self.bus.close();
    }

    pub fn snapshot(&self) -> SequencerSnapshot {
        SequencerSnapshot {
            state: self.state,
            cursor: self.cursor.index(),
            current_item: self.current.as_ref().map(|p| p.id()),
            current_location: self.current.as_ref().map(|p| p.entry().uri().to_string()),
            pending_releases: self.pending.len(),
            linked_slots: self.bus.linked_count(),
            allocated_slots: self.bus.allocated_count(),
            items_offset: self.bus.items_offset(),
            consecutive_faults: self.consecutive_faults,
            retry_scheduled: self.retry_scheduled,
        }
    }
}
