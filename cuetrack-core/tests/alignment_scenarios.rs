use std::time::Duration;

use cuetrack_core::{
    AlignmentEngine, AlignmentUpdateEvent, CuetrackError, EngineConfig, RejectReason,
    RejectedEvent, Script, UpdateSource,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const WELCOME: &str = "Welcome to our presentation";
const FOX: &str =
    "The quick brown fox jumps over the lazy dog while the farmer watches from the old red barn";

fn running_engine(script: &str) -> AlignmentEngine {
    let engine = AlignmentEngine::new(EngineConfig::default());
    engine.load_script(script);
    engine.start().expect("start engine");
    engine
}

async fn recv_event_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>, timeout: Duration) -> T {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => panic!("event channel failed: {e}"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

async fn next_update(rx: &mut broadcast::Receiver<AlignmentUpdateEvent>) -> AlignmentUpdateEvent {
    recv_event_with_timeout(rx, Duration::from_secs(2)).await
}

async fn next_rejection(rx: &mut broadcast::Receiver<RejectedEvent>) -> RejectedEvent {
    recv_event_with_timeout(rx, Duration::from_secs(2)).await
}

fn assert_no_event<T: Clone>(rx: &mut broadcast::Receiver<T>) {
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn exact_reading_moves_cursor_to_end_of_phrase() {
    let engine = running_engine(WELCOME);
    let mut updates = engine.subscribe_updates();

    engine
        .push_batch(["Welcome", "to", "our", "presentation"].as_slice())
        .expect("push batch");

    let event = next_update(&mut updates).await;
    assert_eq!(event.source, UpdateSource::Speech);
    assert_eq!(event.original_position, 4);
    assert_eq!(event.matched_display_indices, vec![0, 1, 2, 3]);
    assert_eq!(engine.cursor(), 4);
}

#[tokio::test]
async fn misrecognized_word_still_aligns() {
    let engine = running_engine(WELCOME);
    let mut updates = engine.subscribe_updates();

    engine
        .push_batch(["Welcome", "too", "our", "presentation"].as_slice())
        .expect("push batch");

    let event = next_update(&mut updates).await;
    assert_eq!(event.original_position, 4);
    assert_eq!(engine.cursor(), 4);
}

#[test]
fn attachment_collapses_to_one_display_token() {
    let script = Script::parse("Hello [[img: a b c]] world");
    let mapper = script.mapper();

    assert_eq!(script.attachments().len(), 1);
    assert_eq!(script.attachments()[0].start_index, 1);
    assert_eq!(script.attachments()[0].end_index, 5);
    assert_eq!(script.display().len(), 3);

    assert_eq!(mapper.to_display_index(1), None);
    assert_eq!(mapper.next_valid_original_index(1), 5);
    assert_eq!(mapper.to_display_index(5), Some(1));
    assert_eq!(mapper.to_display_index(0), Some(0));
}

#[tokio::test]
async fn unrelated_speech_is_rejected_without_update() {
    let engine = running_engine(WELCOME);
    let mut updates = engine.subscribe_updates();
    let mut rejections = engine.subscribe_rejections();

    engine
        .push_batch(["xyz", "qpr"].as_slice())
        .expect("push batch");

    let rejected = next_rejection(&mut rejections).await;
    assert_eq!(rejected.reason, RejectReason::NoMatch);
    assert_eq!(rejected.cursor, 0);
    assert_no_event(&mut updates);
    assert_eq!(engine.cursor(), 0);
    assert_eq!(engine.diagnostics_snapshot().no_match, 1);
}

#[tokio::test]
async fn consecutive_batches_advance_monotonically() {
    let engine = running_engine(FOX);
    let mut updates = engine.subscribe_updates();

    let mut positions = Vec::new();
    for batch in ["the quick brown", "fox jumps over", "the lazy dog"] {
        engine.push_batch(batch).expect("push batch");
        positions.push(next_update(&mut updates).await.original_position);
    }

    assert_eq!(positions, vec![3, 6, 9]);
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn repeated_phrase_resolves_to_next_occurrence() {
    let engine = running_engine("thank you all thank you all for coming");
    let mut updates = engine.subscribe_updates();

    engine.push_batch("thank you all").expect("push batch");
    assert_eq!(next_update(&mut updates).await.original_position, 3);

    engine.push_batch("thank you all").expect("push batch");
    assert_eq!(next_update(&mut updates).await.original_position, 6);
}

#[tokio::test]
async fn reading_past_an_attachment_skips_its_content() {
    let engine = running_engine("Hello there [[slide: quarterly revenue chart]] world peace");
    let mut updates = engine.subscribe_updates();

    engine.push_batch("hello there").expect("push batch");
    let first = next_update(&mut updates).await;
    assert_eq!(first.original_position, 2);
    assert_eq!(first.display_position, 2);

    engine.push_batch("world peace").expect("push batch");
    let second = next_update(&mut updates).await;
    assert_eq!(second.original_position, 8);
    assert_eq!(second.display_position, 4);
    assert_eq!(second.matched_display_indices, vec![2, 3]);
}

#[tokio::test]
async fn reset_discards_batches_still_queued() {
    let engine = running_engine(FOX);
    let mut updates = engine.subscribe_updates();

    // The consumer task cannot run until this test awaits.
    engine.push_batch("the quick brown").expect("push batch");
    engine.push_batch("fox jumps over").expect("push batch");
    engine.reset();
    engine.stop_and_drain().await.expect("drain");

    let event = next_update(&mut updates).await;
    assert_eq!(event.source, UpdateSource::Reset);
    assert_no_event(&mut updates);
    assert_eq!(engine.cursor(), 0);
    assert_eq!(engine.diagnostics_snapshot().stale_dropped, 2);
}

#[tokio::test]
async fn manual_jump_then_speech_continues_from_new_position() {
    let engine = running_engine(FOX);
    let mut updates = engine.subscribe_updates();

    engine.update_position(9).expect("manual jump");
    let manual = next_update(&mut updates).await;
    assert_eq!(manual.source, UpdateSource::Manual);
    assert_eq!(manual.original_position, 9);

    engine.push_batch("while the farmer watches").expect("push batch");
    let spoken = next_update(&mut updates).await;
    assert_eq!(spoken.source, UpdateSource::Speech);
    assert_eq!(spoken.original_position, 13);
}

#[tokio::test]
async fn manual_jump_backward_is_allowed() {
    let engine = running_engine(FOX);
    let mut updates = engine.subscribe_updates();

    engine.push_batch("the quick brown fox jumps over").expect("push batch");
    assert_eq!(next_update(&mut updates).await.original_position, 6);

    engine.update_position(1).expect("manual jump back");
    assert_eq!(engine.cursor(), 1);

    engine.push_batch("quick brown fox").expect("push batch");
    let event = next_update(&mut updates).await;
    assert_eq!(event.source, UpdateSource::Manual);
    let event = next_update(&mut updates).await;
    assert_eq!(event.original_position, 4);
}

#[tokio::test]
async fn batch_without_script_is_refused() {
    let engine = AlignmentEngine::new(EngineConfig::default());
    engine.start().expect("start engine");
    let mut rejections = engine.subscribe_rejections();

    engine.push_batch("hello world").expect("push batch");

    let rejected = next_rejection(&mut rejections).await;
    assert_eq!(rejected.reason, RejectReason::EmptyScript);
    assert!(matches!(
        engine.update_position(0),
        Err(CuetrackError::EmptyScript)
    ));
}

#[tokio::test]
async fn lifecycle_errors_instead_of_panicking() {
    let engine = running_engine(WELCOME);
    assert!(matches!(engine.start(), Err(CuetrackError::AlreadyRunning)));
    engine.stop().expect("stop");
    assert!(matches!(engine.stop(), Err(CuetrackError::NotRunning)));
    assert!(matches!(
        engine.push_batch("welcome"),
        Err(CuetrackError::NotRunning)
    ));

    engine.join().await.expect("join stopped consumer");
    engine.start().expect("restart");
    assert!(engine.is_running());
    assert!(matches!(engine.join().await, Err(CuetrackError::AlreadyRunning)));
}

#[tokio::test]
async fn restart_waits_for_previous_consumer_to_drain() {
    let engine = running_engine(FOX);
    let mut updates = engine.subscribe_updates();

    engine.push_batch("the quick brown").expect("push batch");
    engine.push_batch("fox jumps over").expect("push batch");
    engine.stop().expect("stop");

    // The old consumer has not run yet; a second one must not start beside it.
    assert!(matches!(engine.start(), Err(CuetrackError::AlreadyRunning)));
    assert!(!engine.is_running());

    engine.join().await.expect("join stopped consumer");
    engine.start().expect("restart");
    engine.push_batch("the lazy dog").expect("push batch");

    let mut positions = Vec::new();
    for _ in 0..3 {
        positions.push(next_update(&mut updates).await.original_position);
    }
    assert_eq!(positions, vec![3, 6, 9]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_under_load_keeps_arrival_order() {
    let engine = running_engine(FOX);
    let mut updates = engine.subscribe_updates();

    for batch in ["the quick brown", "fox jumps over", "the lazy dog", "while the farmer"] {
        engine.push_batch(batch).expect("push batch");
    }
    engine.stop().expect("stop");
    loop {
        match engine.start() {
            Ok(()) => break,
            Err(CuetrackError::AlreadyRunning) => {
                engine.join().await.expect("join stopped consumer");
            }
            Err(e) => panic!("restart failed: {e}"),
        }
    }
    for batch in ["watches from the", "old red barn"] {
        engine.push_batch(batch).expect("push batch");
    }

    let mut positions = Vec::new();
    for _ in 0..6 {
        positions.push(next_update(&mut updates).await.original_position);
    }
    assert_eq!(positions, vec![3, 6, 9, 12, 15, 18]);
    engine.stop_and_drain().await.expect("drain");
    assert_eq!(engine.cursor(), 18);
}

#[tokio::test]
async fn punctuation_only_batch_is_ignored() {
    let engine = running_engine(WELCOME);
    let mut updates = engine.subscribe_updates();
    let mut rejections = engine.subscribe_rejections();

    engine.push_batch("... — !").expect("push batch");
    engine.stop_and_drain().await.expect("drain");

    assert_no_event(&mut updates);
    assert_no_event(&mut rejections);
    assert_eq!(engine.diagnostics_snapshot().batches_in, 0);
}

#[test]
fn config_file_round_trips_through_load() {
    let path = std::env::temp_dir().join(format!("cuetrack-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "manualGraceMs": 250, "matcher": { "precision": 90, "maxLookahead": 30 } }"#,
    )
    .expect("write config");

    let config = EngineConfig::load(&path).expect("load config");
    std::fs::remove_file(&path).ok();

    assert_eq!(config.manual_grace_ms, 250);
    assert_eq!(config.matcher.precision, 90);
    assert_eq!(config.matcher.max_lookahead, 30);
    assert_eq!(config.context_capacity, 24);
}
