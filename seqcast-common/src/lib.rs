//! # seqcast Common Library
//!
//! Shared code for the seqcast workspace:
//! - Common error type
//! - Configuration file discovery and playlist folder resolution
//! - Timeline timestamps and human-readable time formatting
//! - Event types (SeqEvent enum) and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::Timestamp;
