//! Event types for the seqcast event system
//!
//! Provides the shared event definitions and the EventBus used by the
//! sequencer to report what it is doing to the session front end.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Items flow into the mix
    Playing,
    /// Item lane blocked, filler keeps the output alive
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
        }
    }
}

/// seqcast event types
///
/// Events are broadcast via EventBus and can be serialized for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SeqEvent {
    /// A session was opened and its catalog built
    SessionStarted {
        /// Folder the catalog was built from
        folder: String,
        /// Number of playable entries
        entries: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The cursor moved because of an operator command
    ///
    /// `location` is the display form (percent-decoded URI).
    WillPlay {
        location: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item player was constructed and attached to the mix
    ItemStarted {
        item_id: Uuid,
        location: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item player fired its completion notification
    ItemFinished {
        item_id: Uuid,
        /// True when finished because of a stop request
        stopped: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item's sub-graph faulted; the fault was contained
    ItemFault {
        item_id: Uuid,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback state changed (Playing <-> Paused)
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        /// Offset correction applied on resume (zero on pause)
        offset_applied: Timestamp,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pause requested while already paused
    AlreadyPaused {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Play requested while not paused
    AlreadyPlaying {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A hand-off happened while paused; its release was queued
    HandoffDeferred {
        item_id: Uuid,
        /// Queue length after this push
        pending: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A deferred release was executed after resume
    PendingReleased {
        item_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item's sub-graph was fully torn down
    ItemRetired {
        item_id: Uuid,
        /// Release attempts it took (1 = first try)
        attempts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The session was closed and all items handed to the reclaimer
    SessionEnded {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SeqEvent {
    /// Event type name, for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            SeqEvent::SessionStarted { .. } => "SessionStarted",
            SeqEvent::WillPlay { .. } => "WillPlay",
            SeqEvent::ItemStarted { .. } => "ItemStarted",
            SeqEvent::ItemFinished { .. } => "ItemFinished",
            SeqEvent::ItemFault { .. } => "ItemFault",
            SeqEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            SeqEvent::AlreadyPaused { .. } => "AlreadyPaused",
            SeqEvent::AlreadyPlaying { .. } => "AlreadyPlaying",
            SeqEvent::HandoffDeferred { .. } => "HandoffDeferred",
            SeqEvent::PendingReleased { .. } => "PendingReleased",
            SeqEvent::ItemRetired { .. } => "ItemRetired",
            SeqEvent::SessionEnded { .. } => "SessionEnded",
        }
    }
}

/// Broadcast bus for SeqEvents
///
/// Slow subscribers lose the oldest events rather than stalling the emitter.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SeqEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SeqEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    pub fn emit(&self, event: SeqEvent) -> Result<usize, broadcast::error::SendError<SeqEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: SeqEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(SeqEvent::AlreadyPaused { timestamp: chrono::Utc::now() })
            .expect("one subscriber");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "AlreadyPaused");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus.emit(SeqEvent::SessionEnded { timestamp: chrono::Utc::now() }).is_err());
        // lossy variant never fails
        bus.emit_lossy(SeqEvent::SessionEnded { timestamp: chrono::Utc::now() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_serialization_tag() {
        let event = SeqEvent::PlaybackStateChanged {
            old_state: PlaybackState::Paused,
            new_state: PlaybackState::Playing,
            offset_applied: Timestamp::from_millis(250),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PlaybackStateChanged");
        assert_eq!(json["new_state"], "playing");
        assert_eq!(json["offset_applied"], 250_000_000u64);
    }
}
