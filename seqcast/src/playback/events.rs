//! Control timeline messages
//!
//! Everything that changes sequencer state arrives as a [`ControlEvent`] on a
//! single unbounded channel: operator commands, completion notices from
//! backend threads, backoff timers and shutdown. The sequencer consumes them
//! one at a time, so no two state transitions ever interleave.
//!
//! These are internal; operator-facing reporting goes through
//! `seqcast_common::events::SeqEvent`.

use super::sequencer::SequencerState;
use seqcast_common::Timestamp;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Operator command accepted by the session adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Previous,
    Pause,
    Play,
}

impl Command {
    /// Exact, case-sensitive command word
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "next" => Some(Command::Next),
            "prev" => Some(Command::Previous),
            "pause" => Some(Command::Pause),
            "play" => Some(Command::Play),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Next => "next",
            Command::Previous => "prev",
            Command::Pause => "pause",
            Command::Play => "play",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion notice posted by an item player's guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedNotice {
    pub item_id: Uuid,
    /// True when the stop request won the guard
    pub stopped: bool,
    /// Set when a contained fault won the guard
    pub fault: Option<String>,
}

/// Message into the control timeline
#[derive(Debug)]
pub enum ControlEvent {
    Command(Command),
    ItemFinished(FinishedNotice),
    /// Fault backoff elapsed; try starting the current entry again
    RetryPlayback,
    Snapshot(oneshot::Sender<SequencerSnapshot>),
    /// Stop everything; the sender is signalled once teardown is scheduled
    Shutdown(oneshot::Sender<()>),
}

pub type ControlSender = mpsc::UnboundedSender<ControlEvent>;
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlEvent>;

pub fn control_channel() -> (ControlSender, ControlReceiver) {
    mpsc::unbounded_channel()
}

/// Point-in-time view of the sequencer, for tests and diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerSnapshot {
    pub state: SequencerState,
    pub cursor: usize,
    pub current_item: Option<Uuid>,
    pub current_location: Option<String>,
    pub pending_releases: usize,
    /// Item slots currently delivering (filler excluded)
    pub linked_slots: usize,
    /// Item slots allocated, linked or not (filler excluded)
    pub allocated_slots: usize,
    /// Cumulative offset applied to the item lane
    pub items_offset: Timestamp,
    pub consecutive_faults: usize,
    pub retry_scheduled: bool,
}
