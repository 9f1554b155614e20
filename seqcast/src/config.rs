//! Configuration for the seqcast engine
//!
//! Settings sources, in priority order:
//! 1. Command-line arguments
//! 2. Environment variables (SEQCAST_PLAYLIST_FOLDER)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! The playlist folder is carried in the config value and handed explicitly to
//! the session adapter; nothing here is process-global.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeqConfig {
    /// Folder whose regular files form the playlist
    pub playlist_folder: Option<PathBuf>,

    /// Output format and PCM sink
    pub output: OutputConfig,

    /// Live filler source mixed under every item
    pub filler: FillerConfig,

    /// Teardown retry policy
    pub reclaim: ReclaimConfig,

    /// Merge slots on the combining stage, filler slot included
    pub merge_slots: usize,

    /// Depth of each item's sample ring, in milliseconds of output audio
    pub item_buffer_ms: u64,

    /// Delay before restarting after every catalog entry faulted in a row
    pub fault_backoff_ms: u64,

    /// Upper bound on waiting for teardown when a session ends
    pub shutdown_timeout_ms: u64,

    /// Pause length after which resume logs a drift warning
    pub drift_warning_secs: u64,

    /// EventBus channel capacity
    pub event_capacity: usize,
}

impl Default for SeqConfig {
    fn default() -> Self {
        Self {
            playlist_folder: None,
            output: OutputConfig::default(),
            filler: FillerConfig::default(),
            reclaim: ReclaimConfig::default(),
            merge_slots: 16,
            item_buffer_ms: 500,
            fault_backoff_ms: 1000,
            shutdown_timeout_ms: 5000,
            drift_warning_secs: 24 * 3600,
            event_capacity: 256,
        }
    }
}

/// Where the mixed PCM goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Interleaved S16LE to a file, or stdout when no path is set
    Raw,
    /// Discard samples (timeline still advances in real time)
    Null,
    /// Default sound device (requires the `device-output` feature)
    Device,
}

impl std::str::FromStr for SinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(SinkKind::Raw),
            "null" => Ok(SinkKind::Null),
            "device" => Ok(SinkKind::Device),
            other => Err(Error::Config(format!("Unknown sink kind: {}", other))),
        }
    }
}

/// Output format of the combining stage
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Mixer tick length in milliseconds
    pub period_ms: u64,
    pub sink: SinkKind,
    /// Output file for the raw sink
    pub path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            period_ms: 10,
            sink: SinkKind::Null,
            path: None,
        }
    }
}

impl OutputConfig {
    /// Frames produced per mixer tick
    pub fn period_frames(&self) -> usize {
        (self.sample_rate as u64 * self.period_ms / 1000).max(1) as usize
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Filler source settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FillerConfig {
    pub frequency_hz: f32,
    /// 0.0 keeps the stream alive with silence
    pub volume: f32,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            volume: 0.0,
        }
    }
}

/// Reclaimer backoff settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Busy answers tolerated before a warning is logged
    pub warn_after_attempts: u32,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            warn_after_attempts: 50,
        }
    }
}

impl SeqConfig {
    /// Load from a TOML file; missing keys take built-in defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = seqcast_common::config::read_config_file(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SeqConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.output.sample_rate == 0 {
            return Err(Error::Config("output.sample_rate must be positive".to_string()));
        }
        if !(1..=8).contains(&self.output.channels) {
            return Err(Error::Config(format!(
                "output.channels must be 1..=8, got {}",
                self.output.channels
            )));
        }
        if !(1..=100).contains(&self.output.period_ms) {
            return Err(Error::Config(format!(
                "output.period_ms must be 1..=100, got {}",
                self.output.period_ms
            )));
        }
        if self.merge_slots < 2 {
            return Err(Error::Config(
                "merge_slots must leave room for the filler and one item".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.filler.volume) {
            return Err(Error::Config(format!(
                "filler.volume must be 0.0..=1.0, got {}",
                self.filler.volume
            )));
        }
        if self.reclaim.initial_backoff_ms == 0
            || self.reclaim.max_backoff_ms < self.reclaim.initial_backoff_ms
        {
            return Err(Error::Config(
                "reclaim backoff must be positive and max >= initial".to_string(),
            ));
        }
        Ok(())
    }

    /// Playlist folder, or a config error when none was resolved
    pub fn require_playlist_folder(&self) -> Result<&Path> {
        self.playlist_folder
            .as_deref()
            .ok_or_else(|| Error::Config("No playlist folder configured".to_string()))
    }

    /// Sample ring capacity per item, in samples (not frames)
    pub fn item_buffer_samples(&self) -> usize {
        let frames = self.output.sample_rate as u64 * self.item_buffer_ms / 1000;
        (frames as usize).max(self.output.period_frames()) * self.output.channels as usize
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
