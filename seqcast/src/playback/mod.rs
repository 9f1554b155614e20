//! Playlist sequencing
//!
//! - [`catalog`]: the circular, sorted playlist
//! - [`item_player`]: one item's playback with its one-shot completion guard
//! - [`mix_bus`]: merge slots on the combining stage, filler included
//! - [`reclaimer`]: asynchronous teardown with backoff
//! - [`sequencer`]: the state machine tying them together
//! - [`events`]: messages into the control timeline

pub mod catalog;
pub mod events;
pub mod item_player;
pub mod mix_bus;
pub mod reclaimer;
pub mod sequencer;

pub use catalog::{Catalog, Cursor, PlaylistEntry};
pub use events::{Command, ControlEvent, FinishedNotice, SequencerSnapshot};
pub use item_player::{CompletionGuard, ItemPlayer, ItemState};
pub use mix_bus::MixBus;
pub use reclaimer::Reclaimer;
pub use sequencer::{Sequencer, SequencerState};
