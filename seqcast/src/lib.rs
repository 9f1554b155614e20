//! # seqcast
//!
//! Continuous-playback sequencing engine.
//!
//! **Purpose:** Play the regular files of one folder in lexical order, forever,
//! through a single combining stage that never goes silent: a live filler
//! source is always mixed under the current item, so moving from one item to
//! the next (or pausing) never interrupts the output stream.
//!
//! **Architecture:** A single control task owns the sequencer. Backend threads
//! and operator commands reach it only as messages; slow teardown runs on
//! reclaimer tasks so the control timeline never blocks.

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;

pub use config::SeqConfig;
pub use error::{Error, Result};
pub use session::{LineReply, SessionAdapter, SessionHandle};
