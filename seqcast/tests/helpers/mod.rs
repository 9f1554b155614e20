//! Test helper modules for seqcast integration tests
//!
//! - MockBackend: scriptable backend recording every call
//! - audio_generator: WAV fixtures for playlist folders

#![allow(dead_code)]

pub mod audio_generator;
pub mod mock_backend;

pub use audio_generator::{generate_sine_wav, playlist_folder, write_garbage};
pub use mock_backend::MockBackend;

use seqcast::playback::events::ControlReceiver;
use seqcast::playback::Sequencer;
use std::time::Duration;

/// Feed every queued control event to `sequencer`; returns how many
pub fn pump(sequencer: &mut Sequencer, rx: &mut ControlReceiver) -> usize {
    let mut handled = 0;
    while let Ok(event) = rx.try_recv() {
        sequencer.handle_event(event);
        handled += 1;
    }
    handled
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
