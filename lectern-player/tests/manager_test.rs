//! Tests for QueueManager
//! Auto-advance, repeat, removal while playing, stale generation results and errors

mod common;

use common::{bulky_generator, harness, harness_with_generator, item, quiet_config, Harness, SinkCall};
use lectern_core::ContentKind;
use lectern_player::{AudioEvent, PlaybackState, QueueCommand, QueueConfig, QueueSnapshot, RepeatMode};
use lectern_spk::{CacheKey, SpeechGenerator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drive the manager until the current item's clip is playing
async fn play_current(h: &mut Harness, duration: f64) {
    while h.manager.is_generating() {
        h.manager.step().await;
    }
    assert_eq!(h.manager.controller().state(), PlaybackState::Loading);
    h.output.emit(AudioEvent::Loaded { duration });
    h.manager.step().await;
    assert_eq!(h.manager.controller().state(), PlaybackState::Playing);
}

async fn finish_clip(h: &mut Harness) {
    h.output.emit(AudioEvent::Ended);
    h.manager.step().await;
}

#[tokio::test]
async fn test_auto_advance_to_next_item() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "Intro", "Hello world.")).unwrap();
    h.manager.add(item("b", "Body", "More text here.")).unwrap();

    h.manager.play_from(0).unwrap();
    assert!(h.manager.is_generating());
    assert!(h.handle.snapshot().loading);
    play_current(&mut h, 1.2).await;
    assert_eq!(h.manager.queue().current_index(), Some(0));

    finish_clip(&mut h).await;
    assert_eq!(h.manager.queue().current_index(), Some(1));
    assert!(h.manager.is_generating());

    play_current(&mut h, 1.5).await;
    let session = h.manager.controller().session().unwrap();
    assert_eq!(session.source_text(), "More text here.");
    assert_eq!(h.engine_calls.load(Ordering::SeqCst), 2);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.current_index, Some(1));
    assert_eq!(snapshot.playing.unwrap().item_id, "b");
    assert_eq!(snapshot.state, PlaybackState::Playing);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn test_repeat_one_restarts_same_item() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "Only", "Say this again.")).unwrap();
    h.manager.set_repeat(RepeatMode::One);

    h.manager.play_from(0).unwrap();
    play_current(&mut h, 1.0).await;
    h.output.emit(AudioEvent::TimeUpdate(0.8));
    h.manager.step().await;

    finish_clip(&mut h).await;

    assert_eq!(h.manager.queue().current_index(), Some(0));
    assert_eq!(h.manager.controller().state(), PlaybackState::Playing);
    assert_eq!(h.manager.controller().current_time(), 0.0);
    assert_eq!(h.output.opened(), 1);
    assert_eq!(h.engine_calls.load(Ordering::SeqCst), 1);
    assert!(h.output.calls().contains(&SinkCall::Seek(1, 0.0)));
}

#[tokio::test]
async fn test_end_of_queue_stops() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "Only", "Last words.")).unwrap();

    h.manager.play_from(0).unwrap();
    play_current(&mut h, 1.0).await;
    finish_clip(&mut h).await;

    assert_eq!(h.manager.queue().current_index(), None);
    assert_eq!(h.manager.controller().state(), PlaybackState::Idle);
    assert!(!h.manager.is_generating());
}

#[tokio::test]
async fn test_repeat_all_wraps_to_first() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "One", "First item.")).unwrap();
    h.manager.add(item("b", "Two", "Second item.")).unwrap();
    h.manager.set_repeat(RepeatMode::All);

    h.manager.play_from(1).unwrap();
    play_current(&mut h, 1.0).await;
    finish_clip(&mut h).await;

    assert_eq!(h.manager.queue().current_index(), Some(0));
    play_current(&mut h, 1.0).await;
    assert_eq!(
        h.manager.controller().session().unwrap().source_text(),
        "First item."
    );
}

#[tokio::test]
async fn test_remove_current_stops_without_resuming() {
    let mut h = harness(quiet_config());
    for (id, text) in [("a", "Alpha text."), ("b", "Beta text."), ("c", "Gamma text.")] {
        h.manager.add(item(id, id, text)).unwrap();
    }
    h.manager.play_from(1).unwrap();
    play_current(&mut h, 1.0).await;

    h.manager.remove("b");

    assert_eq!(h.manager.controller().state(), PlaybackState::Idle);
    assert!(h.output.calls().contains(&SinkCall::Released(1)));
    assert_eq!(h.manager.queue().current_index(), Some(1));
    assert_eq!(h.manager.queue().current().unwrap().id(), "c");
    assert!(!h.manager.is_generating());

    h.manager.remove("c");
    assert_eq!(h.manager.queue().current_index(), Some(0));
    h.manager.remove("a");
    assert_eq!(h.manager.queue().current_index(), None);
    assert!(h.manager.queue().is_empty());
}

#[tokio::test]
async fn test_remove_other_item_keeps_playing() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("b", "B", "Beta text.")).unwrap();
    h.manager.play_from(1).unwrap();
    play_current(&mut h, 1.0).await;

    h.manager.remove("a");
    h.manager.remove("does-not-exist");

    assert_eq!(h.manager.controller().state(), PlaybackState::Playing);
    assert_eq!(h.manager.queue().current_index(), Some(0));
    assert_eq!(h.manager.queue().current().unwrap().id(), "b");
}

#[tokio::test]
async fn test_late_generation_result_is_discarded() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("b", "B", "Beta text.")).unwrap();

    h.manager.play_from(0).unwrap();
    h.manager.stop();
    h.manager.step().await;

    assert_eq!(h.output.opened(), 0);
    assert_eq!(h.manager.controller().state(), PlaybackState::Idle);
    assert_eq!(h.manager.queue().current_index(), Some(0));
}

#[tokio::test]
async fn test_superseded_item_never_plays() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("b", "B", "Beta text.")).unwrap();

    h.manager.play_from(0).unwrap();
    h.manager.play_from(1).unwrap();
    h.manager.step().await;
    h.manager.step().await;

    assert_eq!(h.output.opened(), 1);
    assert_eq!(
        h.manager.controller().session().unwrap().source_text(),
        "Beta text."
    );
}

#[tokio::test]
async fn test_generation_failure_keeps_queue_and_allows_retry() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "Broken", "FAIL this one.")).unwrap();
    h.manager.add(item("b", "Fine", "This one works.")).unwrap();

    h.manager.play_from(0).unwrap();
    h.manager.step().await;

    let error = h.manager.audio_error().unwrap().to_string();
    assert!(error.contains("service unreachable"), "{}", error);
    assert_eq!(h.manager.queue().current_index(), Some(0));
    assert_eq!(h.manager.queue().len(), 2);
    assert_eq!(h.manager.controller().state(), PlaybackState::Idle);
    assert_eq!(h.handle.snapshot().audio_error, Some(error));

    h.manager.retry().unwrap();
    assert!(h.manager.audio_error().is_none());
    h.manager.step().await;
    assert_eq!(h.engine_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.manager.queue().current_index(), Some(0));
}

#[tokio::test]
async fn test_playback_error_is_surfaced() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.play_from(0).unwrap();
    play_current(&mut h, 1.0).await;

    h.output.emit(AudioEvent::Error(lectern_player::PlaybackError::Decode(
        "corrupt frame".to_string(),
    )));
    h.manager.step().await;

    assert!(h.manager.audio_error().unwrap().contains("corrupt frame"));
    assert_eq!(h.manager.controller().state(), PlaybackState::Idle);
    assert_eq!(h.manager.controller().current_word_index(), None);
    assert_eq!(h.manager.queue().current_index(), Some(0));
}

#[tokio::test]
async fn test_shuffle_does_not_disturb_playing_item() {
    let mut h = harness(quiet_config());
    for id in ["a", "b", "c", "d", "e"] {
        h.manager.add(item(id, id, &format!("Text {}.", id))).unwrap();
    }
    h.manager.play_from(2).unwrap();
    play_current(&mut h, 1.0).await;

    assert!(h.manager.toggle_shuffle());

    assert_eq!(h.manager.queue().current_index(), Some(0));
    assert_eq!(h.manager.queue().current().unwrap().id(), "c");
    assert_eq!(h.manager.controller().state(), PlaybackState::Playing);
    assert_eq!(h.output.opened(), 1);

    let mut ids: Vec<String> = h.manager.queue().items().iter().map(|i| i.id().to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_previous_restarts_when_far_in() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("b", "B", "Beta text.")).unwrap();
    h.manager.play_from(1).unwrap();
    play_current(&mut h, 10.0).await;

    h.output.emit(AudioEvent::TimeUpdate(5.0));
    h.manager.step().await;
    h.manager.previous().unwrap();

    assert_eq!(h.manager.queue().current_index(), Some(1));
    assert_eq!(h.manager.controller().current_time(), 0.0);

    h.manager.previous().unwrap();
    assert_eq!(h.manager.queue().current_index(), Some(0));
    assert!(h.manager.is_generating());
}

#[tokio::test]
async fn test_duplicate_add_is_ignored() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("a", "Again", "Other text.")).unwrap();
    assert_eq!(h.manager.queue().len(), 1);
    assert_eq!(h.manager.queue().items()[0].title(), "A");
}

#[tokio::test]
async fn test_clear_stops_and_empties() {
    let mut h = harness(quiet_config());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.play_from(0).unwrap();
    play_current(&mut h, 1.0).await;

    h.manager.clear();

    let snapshot = h.handle.snapshot();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.current_index, None);
    assert_eq!(snapshot.state, PlaybackState::Idle);
}

#[tokio::test]
async fn test_prefetch_warms_the_next_item() {
    let mut h = harness(QueueConfig::default());
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("b", "B", "Beta text.")).unwrap();

    h.manager.play_from(0).unwrap();
    play_current(&mut h, 1.0).await;
    tokio::time::timeout(Duration::from_secs(1), async {
        while h.engine_calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    finish_clip(&mut h).await;
    play_current(&mut h, 1.0).await;
    assert_eq!(h.engine_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_autoplay_on_add() {
    let mut h = harness(QueueConfig {
        autoplay_on_add: true,
        prefetch_next: false,
        ..QueueConfig::default()
    });
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    assert!(h.manager.is_generating());
    assert_eq!(h.manager.queue().current_index(), Some(0));

    h.manager.add(item("b", "B", "Beta text.")).unwrap();
    assert_eq!(h.manager.queue().current_index(), Some(0));
}

async fn wait_for(
    rx: &mut tokio::sync::watch::Receiver<QueueSnapshot>,
    predicate: impl Fn(&QueueSnapshot) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_run_loop_with_handle() {
    let h = harness(quiet_config());
    let Harness {
        manager,
        handle,
        output,
        ..
    } = h;
    let task = tokio::spawn(manager.run());
    let mut rx = handle.watch();

    let summary = lectern_core::QueueItem::new("s", "Summary", "A short summary.", ContentKind::Summary).unwrap();
    handle.add(summary).await.unwrap();
    handle.add(item("b", "B", "Beta text.")).await.unwrap();
    handle.play_from(0).await.unwrap();

    wait_for(&mut rx, |s| s.state == PlaybackState::Loading).await;
    output.emit(AudioEvent::Loaded { duration: 1.0 });
    wait_for(&mut rx, |s| s.state == PlaybackState::Playing).await;
    assert_eq!(handle.snapshot().playing.unwrap().kind, ContentKind::Summary);

    handle.send(QueueCommand::SetRate(2.0)).await.unwrap();
    wait_for(&mut rx, |s| s.rate == 2.0).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.play_from(0).await.is_err());
}

fn key_for(generator: &SpeechGenerator, text: &str) -> CacheKey {
    let config = generator.config();
    CacheKey::new(text, &config.voice, &config.options)
}

/// Let spawned generations run until `condition` holds
async fn settle(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_playing_clip_stays_cached_under_a_small_budget() {
    // Three 400 KB clips overflow a 1 MB cache
    let calls = Arc::new(AtomicUsize::new(0));
    let generator = bulky_generator(400 * 1024, 1, Arc::clone(&calls));
    let mut h = harness_with_generator(QueueConfig::default(), generator, calls);
    h.manager.add(item("a", "A", "Alpha text.")).unwrap();
    h.manager.add(item("b", "B", "Beta text.")).unwrap();

    let alpha = key_for(&h.generator, "Alpha text.");
    let beta = key_for(&h.generator, "Beta text.");
    let other = key_for(&h.generator, "Unrelated one.");

    // Other clips land after the playing one is generated but before it is loaded
    h.manager.play_from(0).unwrap();
    let cache = h.generator.cache().clone();
    settle(|| cache.contains(&alpha)).await;
    h.generator.generate("Unrelated one.").await.unwrap();
    h.generator.generate("Unrelated two.").await.unwrap();
    assert!(cache.contains(&alpha));
    assert!(!cache.contains(&other));

    h.manager.step().await;
    assert_eq!(h.manager.controller().state(), PlaybackState::Loading);

    // Loading starts the prefetch of the next item, which evicts again
    settle(|| cache.contains(&beta)).await;
    assert!(cache.contains(&alpha));
    assert!(!cache.contains(&key_for(&h.generator, "Unrelated two.")));
    assert_eq!(h.engine_calls.load(Ordering::SeqCst), 4);
}
