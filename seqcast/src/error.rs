//! Error types for seqcast
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Only the catalog errors are fatal to a session; everything raised below the
//! item player boundary is contained and logged.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the seqcast engine
#[derive(Error, Debug)]
pub enum Error {
    /// Playlist folder contains no regular files
    #[error("Playlist folder {path:?} contains no playable files")]
    EmptyDirectory { path: PathBuf },

    /// Playlist folder could not be opened or listed
    #[error("Playlist folder {path:?} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output (sink) errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Media backend refused an operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// Every merge slot of the mix bus is allocated
    #[error("All {capacity} merge slots are in use")]
    SlotsExhausted { capacity: usize },

    /// Slot handle refers to a slot that was already released
    #[error("Stale merge slot handle")]
    StaleSlot,

    /// Slot released while it was still delivering samples
    #[error("Merge slot is still linked")]
    SlotStillLinked,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A playback session is already open on this engine
    #[error("A playback session is already active")]
    SessionActive,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] seqcast_common::Error),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type using the seqcast Error
pub type Result<T> = std::result::Result<T, Error>;
