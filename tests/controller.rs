//! End-to-end tests of the session controller with a mock capture source,
//! mock transcriber and a temporary history store.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use whisper_aloud::audio::capture::{CaptureFactory, CaptureSource, MockCaptureSource, MockFailure};
use whisper_aloud::audio::sine;
use whisper_aloud::clipboard::{Clipboard, MockClipboard};
use whisper_aloud::config::Config;
use whisper_aloud::daemon::controller::{
    Controller, ControllerHandle, EngineEvent, TranscriberFactory,
};
use whisper_aloud::error::WhisperAloudError;
use whisper_aloud::history::HistoryStore;
use whisper_aloud::stt::{MockTranscriber, Transcriber};

struct Harness {
    handle: ControllerHandle,
    events: broadcast::Receiver<EngineEvent>,
    store: Arc<HistoryStore>,
    clipboard: Arc<MockClipboard>,
    _dir: TempDir,
}

async fn build_harness(
    samples: Vec<f32>,
    failure: MockFailure,
    transcriber: MockTranscriber,
    mutate_config: impl FnOnce(&mut Config),
) -> Harness {
    let dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.persistence.db_path = Some(dir.path().join("history.db"));
    config.persistence.audio_archive_path = Some(dir.path().join("audio"));
    mutate_config(&mut config);

    let store = Arc::new(
        HistoryStore::open(
            &config.db_path(),
            &config.archive_path(),
            config.persistence.clone(),
        )
        .await
        .unwrap(),
    );

    let clipboard = Arc::new(MockClipboard::new());

    let capture_factory: CaptureFactory = Box::new(move |capture_config| {
        Ok(Box::new(
            MockCaptureSource::new(capture_config)
                .with_samples(samples.clone())
                .with_failure(failure),
        ) as Box<dyn CaptureSource>)
    });

    let transcriber: Arc<dyn Transcriber> = Arc::new(transcriber);
    let transcriber_factory: TranscriberFactory = Box::new(move |_| Arc::clone(&transcriber));

    let (controller, handle, inbox) = Controller::new(
        config,
        dir.path().join("config.json"),
        Arc::clone(&store),
        Arc::clone(&clipboard) as Arc<dyn Clipboard>,
        capture_factory,
        transcriber_factory,
    );
    let events = handle.subscribe();
    tokio::spawn(controller.run(inbox));

    Harness {
        handle,
        events,
        store,
        clipboard,
        _dir: dir,
    }
}

async fn next_event(events: &mut broadcast::Receiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for engine event")
        .expect("event channel closed")
}

/// Drain events until one matches, failing after a timeout.
async fn wait_for(
    events: &mut broadcast::Receiver<EngineEvent>,
    mut pred: impl FnMut(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let matched = pred(&event);
        seen.push(event);
        if matched {
            return seen;
        }
    }
}

fn speech(seconds: f32) -> Vec<f32> {
    // Leading/trailing near-silence around a clear tone
    let mut samples = vec![0.0_f32; 800];
    samples.extend(sine(440.0, 0.3, seconds));
    samples.extend(vec![0.0_f32; 800]);
    samples
}

#[tokio::test]
async fn clean_utterance_produces_one_entry_and_signals() {
    let mut h = build_harness(
        speech(3.0),
        MockFailure::None,
        MockTranscriber::new("base").with_response("hello from the test"),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    assert_eq!(next_event(&mut h.events).await, EngineEvent::RecordingStarted);
    assert_eq!(
        next_event(&mut h.events).await,
        EngineEvent::StatusChanged {
            state: "recording".to_string()
        }
    );

    let text = h.handle.stop().await.unwrap();
    assert_eq!(text, "hello from the test");

    let seen = wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::TranscriptionReady { .. })
    })
    .await;

    // RecordingStopped precedes TranscriptionReady
    let stopped_at = seen
        .iter()
        .position(|e| *e == EngineEvent::RecordingStopped)
        .expect("RecordingStopped emitted");
    let ready_at = seen.len() - 1;
    assert!(stopped_at < ready_at);

    match &seen[ready_at] {
        EngineEvent::TranscriptionReady { text, meta } => {
            assert_eq!(text, "hello from the test");
            assert!(meta.duration > 2.5, "duration {} too short", meta.duration);
            assert!(meta.entry_id > 0);
        }
        other => panic!("expected TranscriptionReady, got {:?}", other),
    }

    // TranscriptionReady precedes history visibility; by now it must be there
    let entries = h.handle.get_history(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "hello from the test");
    // save_audio defaults to off
    assert!(entries[0].archive_hash.is_none());

    // Delivered to the clipboard (copy runs off the dispatcher)
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.clipboard.copied(), vec!["hello from the test"]);

    // Engine is reusable
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.state, "idle");
}

#[tokio::test]
async fn cancel_mid_record_discards_everything() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "recording")
    })
    .await;

    h.handle.cancel().await.unwrap();
    let seen = wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "idle")
    })
    .await;

    assert!(
        !seen
            .iter()
            .any(|e| matches!(e, EngineEvent::RecordingStopped))
    );
    assert!(
        !seen
            .iter()
            .any(|e| matches!(e, EngineEvent::TranscriptionReady { .. }))
    );

    // Give any stray transcription a moment, then confirm nothing landed
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.store.entry_count().await.unwrap(), 0);
    assert!(h.clipboard.copied().is_empty());

    // Next start is accepted (state monotonicity)
    h.handle.start().await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.state, "recording");
}

#[tokio::test]
async fn silence_yields_empty_text_and_no_entry() {
    let mut h = build_harness(
        vec![0.0_f32; 32000], // 2s of exact zeros
        MockFailure::None,
        MockTranscriber::new("base").with_response(""),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    let text = h.handle.stop().await.unwrap();
    assert_eq!(text.trim(), "");

    let seen = wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::TranscriptionReady { .. })
    })
    .await;
    match seen.last().unwrap() {
        EngineEvent::TranscriptionReady { text, meta } => {
            assert_eq!(text.trim(), "");
            // No entry written under the default save_empty=false policy
            assert_eq!(meta.entry_id, -1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(h.store.entry_count().await.unwrap(), 0);
    assert!(h.clipboard.copied().is_empty());
}

#[tokio::test]
async fn duplicate_audio_shares_one_archive_blob() {
    let samples = speech(1.0);
    let mut h = build_harness(
        samples,
        MockFailure::None,
        MockTranscriber::new("base").with_response("same words"),
        |config| config.persistence.save_audio = true,
    )
    .await;

    for _ in 0..2 {
        h.handle.start().await.unwrap();
        h.handle.stop().await.unwrap();
        wait_for(&mut h.events, |e| {
            matches!(e, EngineEvent::TranscriptionReady { .. })
        })
        .await;
    }

    let entries = h.handle.get_history(10).await.unwrap();
    assert_eq!(entries.len(), 2);

    let hash = entries[0].archive_hash.clone().expect("audio archived");
    assert_eq!(entries[1].archive_hash.as_deref(), Some(hash.as_str()));

    let (ref_count, path) = h.store.archive_object(&hash).await.unwrap().unwrap();
    assert_eq!(ref_count, 2);
    assert!(path.exists());
    assert!(h.store.verify_archive_integrity().await.unwrap());
}

#[tokio::test]
async fn config_swap_applies_at_idle_and_signals_once() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    let mut changes = serde_json::Map::new();
    changes.insert(
        "model.name".to_string(),
        serde_json::Value::String("tiny".to_string()),
    );
    h.handle.set_config(changes).await.unwrap();

    let seen = wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::ConfigChanged { .. })
    })
    .await;
    let config_events: Vec<_> = seen
        .iter()
        .filter(|e| matches!(e, EngineEvent::ConfigChanged { .. }))
        .collect();
    assert_eq!(config_events.len(), 1);
    match config_events[0] {
        EngineEvent::ConfigChanged { keys } => {
            assert_eq!(keys, &vec!["model.name".to_string()])
        }
        _ => unreachable!(),
    }

    // R1: get_config reflects the merge
    let config = h.handle.get_config().await.unwrap();
    assert_eq!(config.model.name, "tiny");
    assert_eq!(config.model.compute_type, "int8");

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.model, "tiny");
}

#[tokio::test]
async fn set_config_rejected_while_recording() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "recording")
    })
    .await;

    let mut changes = serde_json::Map::new();
    changes.insert(
        "model.name".to_string(),
        serde_json::Value::String("tiny".to_string()),
    );
    let result = h.handle.set_config(changes).await;
    assert!(matches!(
        result,
        Err(WhisperAloudError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn device_busy_on_start_reports_error_and_stays_idle() {
    let mut h = build_harness(
        Vec::new(),
        MockFailure::DeviceBusy,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    let result = h.handle.start().await;
    assert!(matches!(result, Err(WhisperAloudError::DeviceBusy { .. })));

    let seen = wait_for(&mut h.events, |e| matches!(e, EngineEvent::Error { .. })).await;
    match seen.last().unwrap() {
        EngineEvent::Error { code, .. } => assert_eq!(code, "device_busy"),
        _ => unreachable!(),
    }

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.state, "idle");
    assert_eq!(h.store.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn no_microphone_on_start_reports_error() {
    let mut h = build_harness(
        Vec::new(),
        MockFailure::NoMicrophone,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    let result = h.handle.start().await;
    assert!(matches!(result, Err(WhisperAloudError::NoMicrophone)));

    let seen = wait_for(&mut h.events, |e| matches!(e, EngineEvent::Error { .. })).await;
    match seen.last().unwrap() {
        EngineEvent::Error { code, .. } => assert_eq!(code, "no_microphone"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn stop_when_idle_is_not_recording_error() {
    let h = build_harness(
        Vec::new(),
        MockFailure::None,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    let result = h.handle.stop().await;
    assert!(matches!(result, Err(WhisperAloudError::NotRecording)));

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.state, "idle");
}

#[tokio::test]
async fn start_while_recording_is_rejected() {
    let h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    let result = h.handle.start().await;
    assert!(matches!(
        result,
        Err(WhisperAloudError::RecordingInProgress)
    ));
}

#[tokio::test]
async fn toggle_twice_runs_one_full_cycle() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base").with_response("toggled"),
        |_| {},
    )
    .await;

    assert_eq!(h.handle.toggle().await.unwrap(), "recording");
    assert_eq!(h.handle.toggle().await.unwrap(), "transcribing");

    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::TranscriptionReady { .. })
    })
    .await;

    let entries = h.handle.get_history(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "toggled");

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.state, "idle");
}

#[tokio::test]
async fn transcription_failure_reports_error_and_recovers() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base").with_failure(),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    let result = h.handle.stop().await;
    assert!(matches!(
        result,
        Err(WhisperAloudError::TranscriptionFailed { .. })
    ));

    let seen = wait_for(&mut h.events, |e| matches!(e, EngineEvent::Error { .. })).await;
    match seen.last().unwrap() {
        EngineEvent::Error { code, .. } => assert_eq!(code, "transcription_failed"),
        _ => unreachable!(),
    }

    // No history entry was written
    assert_eq!(h.store.entry_count().await.unwrap(), 0);

    // The core returns to a usable idle state after every reported error
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.state, "idle");
    h.handle.start().await.unwrap();
}

#[tokio::test]
async fn cancel_during_transcription_drops_result() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base")
            .with_response("late result")
            .with_delay(Duration::from_millis(400)),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    h.handle.stop_nowait().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "transcribing")
    })
    .await;

    h.handle.cancel().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "idle")
    })
    .await;

    // The model call completes after cancel; its result must be dropped
    tokio::time::sleep(Duration::from_millis(600)).await;
    let mut leftover = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        leftover.push(event);
    }
    assert!(
        !leftover
            .iter()
            .any(|e| matches!(e, EngineEvent::TranscriptionReady { .. })),
        "cancelled transcription leaked: {:?}",
        leftover
    );
    assert_eq!(h.store.entry_count().await.unwrap(), 0);

    // Next start accepted
    h.handle.start().await.unwrap();
}

#[tokio::test]
async fn max_duration_triggers_implicit_stop() {
    let mut h = build_harness(
        sine(440.0, 0.3, 2.0), // 2s of signal against a 0.5s cap
        MockFailure::None,
        MockTranscriber::new("base").with_response("capped"),
        |config| config.audio.max_recording_duration = 0.5,
    )
    .await;

    h.handle.start().await.unwrap();

    // Full transcription proceeds as if the user had stopped
    let seen = wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::TranscriptionReady { .. })
    })
    .await;
    assert!(seen.iter().any(|e| *e == EngineEvent::RecordingStopped));

    match seen.last().unwrap() {
        EngineEvent::TranscriptionReady { text, meta } => {
            assert_eq!(text, "capped");
            // The buffer was capped near the configured duration
            assert!(meta.duration <= 0.75, "duration {} not capped", meta.duration);
        }
        _ => unreachable!(),
    }

    let entries = h.handle.get_history(10).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn level_updates_are_throttled_and_bounded() {
    let mut h = build_harness(
        sine(440.0, 0.5, 3.0),
        MockFailure::None,
        MockTranscriber::new("base"),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    h.handle.stop().await.unwrap();

    let mut levels = Vec::new();
    wait_for(&mut h.events, |e| {
        if let EngineEvent::LevelUpdate { level } = e {
            levels.push(*level);
        }
        matches!(e, EngineEvent::TranscriptionReady { .. })
    })
    .await;

    // At most one emission per 100ms window over ~350ms of recording
    assert!(!levels.is_empty(), "no level updates emitted");
    assert!(levels.len() <= 5, "too many level updates: {}", levels.len());
    for level in levels {
        assert!((0.0..=1.0).contains(&level));
        assert!(level > 0.0, "aggregated peak lost");
    }
}

#[tokio::test]
async fn quit_while_recording_flushes_audio_when_save_audio_on() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base"),
        |config| config.persistence.save_audio = true,
    )
    .await;

    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "recording")
    })
    .await;

    h.handle.quit().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::StatusChanged { state } if state == "shutdown")
    })
    .await;

    // The captured audio was archived as a text-less entry
    let entries = h.store.list_recent(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "");
    assert_eq!(entries[0].notes, "shutdown");
    assert!(entries[0].archive_hash.is_some());
    assert!(h.store.verify_archive_integrity().await.unwrap());
}

#[tokio::test]
async fn history_commands_route_through_dispatcher() {
    let mut h = build_harness(
        speech(1.0),
        MockFailure::None,
        MockTranscriber::new("base").with_response("the quick brown fox"),
        |_| {},
    )
    .await;

    h.handle.start().await.unwrap();
    h.handle.stop().await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, EngineEvent::TranscriptionReady { .. })
    })
    .await;

    let hits = h
        .handle
        .search_history("fox".to_string(), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    let id = hits[0].id;

    assert!(h.handle.toggle_favorite(id).await.unwrap());
    let favorites = h.handle.get_favorites(10).await.unwrap();
    assert_eq!(favorites.len(), 1);

    assert!(h.handle.delete_entry(id).await.unwrap());
    assert!(h.handle.get_history(10).await.unwrap().is_empty());
}
