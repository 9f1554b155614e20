//! Session adapter tests: opening, closing and line handling
//!
//! Uses the scriptable backend; playlist folders hold real (tiny) WAV files
//! so catalog construction runs against the filesystem.

mod helpers;

use helpers::{playlist_folder, wait_until, MockBackend};
use seqcast::backend::{CombiningStage, MediaBackend};
use seqcast::config::SeqConfig;
use seqcast::playback::{Command, SequencerState};
use seqcast::session::{operator_message, HELP_TEXT, UNKNOWN_COMMAND_TEXT};
use seqcast::{Error, LineReply, SessionAdapter};
use seqcast_common::events::{EventBus, SeqEvent};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn adapter_for(folder: &Path, backend: &Arc<MockBackend>) -> SessionAdapter {
    let mut config = SeqConfig::default();
    config.playlist_folder = Some(folder.to_path_buf());
    config.reclaim.initial_backoff_ms = 1;
    config.reclaim.max_backoff_ms = 4;
    config.shutdown_timeout_ms = 2_000;

    SessionAdapter::new(
        config,
        Arc::clone(backend) as Arc<dyn MediaBackend>,
        Arc::clone(backend) as Arc<dyn CombiningStage>,
        Arc::new(EventBus::new(256)),
    )
}

#[tokio::test]
async fn test_session_start_plays_first_entry() {
    let (dir, _) = playlist_folder(&["b.wav", "a.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    let mut events = adapter.events().subscribe();

    let handle = adapter.on_session_start().unwrap();
    assert!(adapter.is_active());

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SequencerState::Playing);
    assert_eq!(snapshot.cursor, 0);
    assert!(snapshot.current_location.unwrap().ends_with("/a.wav"));
    assert_eq!(backend.constructed_names(), vec!["a.wav"]);

    match events.recv().await.unwrap() {
        SeqEvent::SessionStarted { entries, .. } => assert_eq!(entries, 2),
        other => panic!("expected SessionStarted, got {:?}", other),
    }

    adapter.on_session_end().await;
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let (dir, _) = playlist_folder(&["a.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);

    adapter.on_session_start().unwrap();
    assert!(matches!(adapter.on_session_start(), Err(Error::SessionActive)));

    adapter.on_session_end().await;
    // A fresh session may be opened once the old one is closed
    adapter.on_session_start().unwrap();
    adapter.on_session_end().await;
}

#[tokio::test]
async fn test_empty_folder_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);

    let err = adapter.on_session_start().unwrap_err();
    assert!(matches!(err, Error::EmptyDirectory { .. }));
    assert!(!adapter.is_active());
    assert!(backend.constructed_names().is_empty());
}

#[tokio::test]
async fn test_missing_folder_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::new();
    let adapter = adapter_for(&dir.path().join("does-not-exist"), &backend);

    let err = adapter.on_session_start().unwrap_err();
    assert!(matches!(err, Error::Unreadable { .. }));
    assert!(!adapter.is_active());
}

#[tokio::test]
async fn test_sanity_failure_fails_start() {
    let (dir, _) = playlist_folder(&["a.wav"], 50);
    let backend = MockBackend::new();
    backend.fail_sanity("no output device");
    let adapter = adapter_for(dir.path(), &backend);

    let err = adapter.on_session_start().unwrap_err();
    assert!(err.to_string().contains("Sanity checks failed"));
    assert!(!adapter.is_active());
}

#[tokio::test]
async fn test_no_folder_configured() {
    let backend = MockBackend::new();
    let adapter = SessionAdapter::new(
        SeqConfig::default(),
        Arc::clone(&backend) as Arc<dyn MediaBackend>,
        Arc::clone(&backend) as Arc<dyn CombiningStage>,
        Arc::new(EventBus::new(16)),
    );

    assert!(matches!(adapter.on_session_start(), Err(Error::Config(_))));
}

// ----- line handling -----

#[tokio::test]
async fn test_help_and_unknown_lines() {
    let (dir, _) = playlist_folder(&["a.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    adapter.on_session_start().unwrap();

    let help = adapter.deliver_line("help\n");
    assert_eq!(help, LineReply::Help);
    assert_eq!(help.text(), Some(HELP_TEXT));
    assert_eq!(
        HELP_TEXT,
        "next: play next song\nprev: play previous song\npause: stop playback\nplay: resume playback"
    );

    let unknown = adapter.deliver_line("stop\n");
    assert_eq!(unknown, LineReply::Unknown);
    assert_eq!(unknown.text(), Some(UNKNOWN_COMMAND_TEXT));

    adapter.on_session_end().await;
}

#[tokio::test]
async fn test_commands_are_exact_and_case_sensitive() {
    let (dir, _) = playlist_folder(&["a.wav", "b.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    adapter.on_session_start().unwrap();

    assert_eq!(adapter.deliver_line("NEXT\n"), LineReply::Unknown);
    assert_eq!(adapter.deliver_line(" next\n"), LineReply::Unknown);
    assert_eq!(adapter.deliver_line("next \n"), LineReply::Unknown);
    assert_eq!(adapter.deliver_line("previous\n"), LineReply::Unknown);
    assert_eq!(adapter.deliver_line("\n"), LineReply::Empty);
    assert_eq!(adapter.deliver_line(""), LineReply::Empty);

    assert_eq!(
        adapter.deliver_line("next\r\n"),
        LineReply::Accepted(Command::Next)
    );
    assert_eq!(
        adapter.deliver_line("prev"),
        LineReply::Accepted(Command::Previous)
    );

    adapter.on_session_end().await;
}

/// Each accepted command is answered by exactly one event carrying operator
/// text; other replies are answered on the spot
#[tokio::test]
async fn test_accepted_commands_answered_by_one_message() {
    let (dir, _) = playlist_folder(&["a.wav", "b.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    let mut events = adapter.events().subscribe();
    adapter.on_session_start().unwrap();
    adapter.snapshot().await.unwrap();
    while events.try_recv().is_ok() {}

    let expected = [
        ("pause\n", "Pausing"),
        ("pause\n", "Already paused"),
        ("play\n", "Resuming playback"),
        ("play\n", "Already playing"),
    ];
    for (line, message) in expected {
        let reply = adapter.deliver_line(line);
        assert!(reply.answered_by_event());
        assert_eq!(reply.text(), None);

        adapter.snapshot().await.unwrap();
        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            messages.extend(operator_message(&event));
        }
        assert_eq!(messages, vec![message.to_string()]);
    }

    let reply = adapter.deliver_line("next\n");
    assert!(reply.answered_by_event());
    adapter.snapshot().await.unwrap();
    let mut messages = Vec::new();
    while let Ok(event) = events.try_recv() {
        messages.extend(operator_message(&event));
    }
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Will play back "));
    assert!(messages[0].ends_with("/b.wav"));

    assert!(!adapter.deliver_line("help\n").answered_by_event());
    assert!(!adapter.deliver_line("stop\n").answered_by_event());
    assert!(!adapter.deliver_line("\n").answered_by_event());

    adapter.on_session_end().await;
    assert!(!adapter.deliver_line("next\n").answered_by_event());
}

#[tokio::test]
async fn test_lines_drive_the_sequencer() {
    let (dir, _) = playlist_folder(&["a.wav", "b.wav", "c.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    adapter.on_session_start().unwrap();

    adapter.deliver_line("next\n");
    let moved = wait_until(
        || backend.constructed_names().len() == 2,
        Duration::from_secs(2),
    )
    .await;
    assert!(moved);
    assert_eq!(backend.constructed_names(), vec!["a.wav", "b.wav"]);

    adapter.deliver_line("pause\n");
    let snapshot = adapter.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SequencerState::Paused);
    assert!(backend.is_blocked());

    adapter.deliver_line("play\n");
    let snapshot = adapter.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SequencerState::Playing);
    assert!(!backend.is_blocked());

    adapter.on_session_end().await;
}

#[tokio::test]
async fn test_end_of_stream_advances_through_session() {
    let (dir, _) = playlist_folder(&["a.wav", "b.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    adapter.on_session_start().unwrap();

    backend.finish_latest();
    let advanced = wait_until(
        || backend.constructed_names().len() == 2,
        Duration::from_secs(2),
    )
    .await;
    assert!(advanced);

    backend.finish_latest();
    let wrapped = wait_until(
        || backend.constructed_names().len() == 3,
        Duration::from_secs(2),
    )
    .await;
    assert!(wrapped);
    assert_eq!(backend.constructed_names(), vec!["a.wav", "b.wav", "a.wav"]);

    adapter.on_session_end().await;
}

// ----- teardown -----

#[tokio::test]
async fn test_session_end_releases_everything() {
    let (dir, _) = playlist_folder(&["a.wav", "b.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);
    let mut events = adapter.events().subscribe();
    let handle = adapter.on_session_start().unwrap();

    // Leave one release deferred
    assert!(handle.send(Command::Pause));
    assert!(handle.send(Command::Next));
    // The first snapshot lands before the stop notice, the second after it
    handle.snapshot().await.unwrap();
    let deferred = handle.snapshot().await.unwrap();
    assert_eq!(deferred.pending_releases, 1);

    adapter.on_session_end().await;

    assert!(!adapter.is_active());
    assert_eq!(backend.released().len(), 2);
    assert!(!backend.filler_linked());
    assert!(backend.linked().is_empty());

    let mut ended = false;
    while let Ok(event) = events.try_recv() {
        ended |= matches!(event, SeqEvent::SessionEnded { .. });
    }
    assert!(ended);

    // The old handle is dead
    assert!(!handle.send(Command::Next));
    assert!(handle.snapshot().await.is_none());
}

#[tokio::test]
async fn test_session_end_is_idempotent() {
    let (dir, _) = playlist_folder(&["a.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);

    // Closing without a session does nothing
    adapter.on_session_end().await;

    adapter.on_session_start().unwrap();
    adapter.on_session_end().await;
    adapter.on_session_end().await;

    assert_eq!(backend.released().len(), 1);
}

#[tokio::test]
async fn test_lines_after_end_are_inactive() {
    let (dir, _) = playlist_folder(&["a.wav"], 50);
    let backend = MockBackend::new();
    let adapter = adapter_for(dir.path(), &backend);

    assert_eq!(adapter.deliver_line("next\n"), LineReply::Inactive);

    adapter.on_session_start().unwrap();
    adapter.on_session_end().await;

    assert_eq!(adapter.deliver_line("next\n"), LineReply::Inactive);
    // Help does not need a session
    assert_eq!(adapter.deliver_line("help\n"), LineReply::Help);
    assert!(adapter.snapshot().await.is_none());
}
